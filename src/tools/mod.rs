// =============================================================================
// Terminal tools
// =============================================================================
//
// One-shot and looping helpers around the RIT REST API. Results meant for
// the operator go to stdout; diagnostics go through `tracing`.
// =============================================================================

pub mod book_format;
pub mod probe;
pub mod speed_test;
pub mod watch;

use tokio::time::Duration;

pub use book_format::{format_book_pretty, summarize_book};

/// Sleep for `secs`; false when Ctrl-C arrived first.
pub(crate) async fn pause(secs: f64) -> bool {
    let secs = if secs.is_finite() { secs.max(0.0) } else { 0.0 };
    let wait = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
    tokio::select! {
        _ = tokio::time::sleep(wait) => true,
        _ = tokio::signal::ctrl_c() => false,
    }
}

/// Requests per second, with elapsed floored at 1 ms.
pub(crate) fn rate(count: u64, elapsed_secs: f64) -> (f64, f64) {
    let elapsed = elapsed_secs.max(0.001);
    (elapsed, count as f64 / elapsed)
}
