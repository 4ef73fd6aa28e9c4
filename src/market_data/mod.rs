pub mod book;
pub mod history;
pub mod ladder;

pub use book::{BookStore, BookSummary};
pub use history::PriceHistory;
pub use ladder::{build_ladder, LadderRow};
