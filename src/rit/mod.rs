// =============================================================================
// RIT REST API access
// =============================================================================
//
// `client` wraps reqwest with the RIT auth headers, retry-after handling and
// typed endpoint calls. `stats` keeps lock-free request counters the
// dashboard exposes.
// =============================================================================

pub mod client;
pub mod stats;

pub use client::{capped_wait, extract_retry_after, RitClient, RitResponse, StatusError, MAX_RETRY_WAIT};
pub use stats::{RequestStats, RequestStatsSnapshot};
