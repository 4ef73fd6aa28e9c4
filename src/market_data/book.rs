// =============================================================================
// Order Book Store: latest book and top-of-book summary per ticker
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{BookLevel, OrderBook};

/// Top-of-book statistics derived from one book snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub best_bid_size: Option<f64>,
    pub best_ask_size: Option<f64>,
    pub mid: Option<f64>,
    pub spread: Option<f64>,
    pub spread_bps: Option<f64>,
    /// Open quantity summed over every bid level.
    pub bid_depth: f64,
    pub ask_depth: f64,
    /// `(bid_depth - ask_depth) / (bid_depth + ask_depth)`, 0 when empty.
    pub imbalance: f64,
}

impl BookSummary {
    pub fn from_book(book: &OrderBook) -> Self {
        let best_bid = first_priced(&book.bids);
        let best_ask = first_priced(&book.asks);

        let (mid, spread, spread_bps) = match (best_bid, best_ask) {
            (Some(b), Some(a)) => {
                let (bid, ask) = (b.price.unwrap_or_default(), a.price.unwrap_or_default());
                let mid = (bid + ask) / 2.0;
                let spread = ask - bid;
                let bps = (mid > 0.0).then(|| spread / mid * 10_000.0);
                (Some(mid), Some(spread), bps)
            }
            _ => (None, None, None),
        };

        let bid_depth = depth(&book.bids);
        let ask_depth = depth(&book.asks);
        let total = bid_depth + ask_depth;
        let imbalance = if total > 0.0 {
            (bid_depth - ask_depth) / total
        } else {
            0.0
        };

        Self {
            best_bid: best_bid.and_then(|l| l.price),
            best_ask: best_ask.and_then(|l| l.price),
            best_bid_size: best_bid.map(BookLevel::open_quantity),
            best_ask_size: best_ask.map(BookLevel::open_quantity),
            mid,
            spread,
            spread_bps,
            bid_depth,
            ask_depth,
            imbalance,
        }
    }
}

fn first_priced(levels: &[BookLevel]) -> Option<&BookLevel> {
    levels.iter().find(|l| l.price.is_some_and(f64::is_finite))
}

fn depth(levels: &[BookLevel]) -> f64 {
    levels.iter().map(BookLevel::open_quantity).filter(|q| q.is_finite()).sum()
}

/// Latest book per ticker, shared between the poller and the API.
pub struct BookStore {
    books: RwLock<HashMap<String, (OrderBook, BookSummary)>>,
}

impl BookStore {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Store `book` for `ticker` and return its summary.
    pub fn update(&self, ticker: &str, book: OrderBook) -> BookSummary {
        let summary = BookSummary::from_book(&book);
        self.books
            .write()
            .insert(ticker.to_string(), (book, summary.clone()));
        summary
    }

    pub fn book(&self, ticker: &str) -> Option<OrderBook> {
        self.books.read().get(ticker).map(|(b, _)| b.clone())
    }

    pub fn summary(&self, ticker: &str) -> Option<BookSummary> {
        self.books.read().get(ticker).map(|(_, s)| s.clone())
    }

    /// Every summary, keyed by ticker.
    pub fn summaries(&self) -> HashMap<String, BookSummary> {
        self.books
            .read()
            .iter()
            .map(|(t, (_, s))| (t.clone(), s.clone()))
            .collect()
    }

    /// Drop every book; used when a new case or period starts.
    pub fn clear(&self) {
        self.books.write().clear();
    }
}

impl Default for BookStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: f64, qty: f64) -> BookLevel {
        BookLevel {
            price: Some(price),
            quantity: Some(qty),
            ..Default::default()
        }
    }

    fn book(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> OrderBook {
        OrderBook {
            bids: bids.iter().map(|&(p, q)| level(p, q)).collect(),
            asks: asks.iter().map(|&(p, q)| level(p, q)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn summary_of_two_sided_book() {
        let s = BookSummary::from_book(&book(&[(9.99, 300.0), (9.98, 100.0)], &[(10.01, 200.0)]));
        assert_eq!(s.best_bid, Some(9.99));
        assert_eq!(s.best_ask, Some(10.01));
        assert_eq!(s.best_bid_size, Some(300.0));
        assert!((s.mid.unwrap() - 10.0).abs() < 1e-10);
        assert!((s.spread.unwrap() - 0.02).abs() < 1e-10);
        assert!((s.spread_bps.unwrap() - 20.0).abs() < 1e-8);
        assert!((s.bid_depth - 400.0).abs() < 1e-10);
        assert!((s.imbalance - (200.0 / 600.0)).abs() < 1e-10);
    }

    #[test]
    fn one_sided_and_empty_books() {
        let s = BookSummary::from_book(&book(&[(9.5, 10.0)], &[]));
        assert_eq!(s.best_bid, Some(9.5));
        assert!(s.mid.is_none() && s.spread.is_none());
        assert!((s.imbalance - 1.0).abs() < 1e-10);

        let empty = BookSummary::from_book(&OrderBook::default());
        assert_eq!(empty.imbalance, 0.0);
        assert!(empty.best_ask.is_none());
    }

    #[test]
    fn filled_quantity_is_not_depth() {
        let mut b = book(&[(10.0, 100.0)], &[(10.1, 100.0)]);
        b.bids[0].quantity_filled = Some(100.0);
        let s = BookSummary::from_book(&b);
        assert_eq!(s.bid_depth, 0.0);
        assert!((s.imbalance + 1.0).abs() < 1e-10);
    }

    #[test]
    fn store_keeps_latest() {
        let store = BookStore::new();
        store.update("CRZY", book(&[(1.0, 1.0)], &[]));
        let s = store.update("CRZY", book(&[(2.0, 1.0)], &[(2.1, 1.0)]));
        assert_eq!(s.best_bid, Some(2.0));
        assert_eq!(store.summary("CRZY").unwrap().best_ask, Some(2.1));
        assert_eq!(store.book("CRZY").unwrap().bids.len(), 1);
        store.clear();
        assert!(store.book("CRZY").is_none());
    }
}
