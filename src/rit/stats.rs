// =============================================================================
// Request Stats: counters for RIT API traffic
// =============================================================================
//
// Updated after every response by the client and read by the dashboard
// without locking. The last retry-after is stored in milliseconds.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Default)]
pub struct RequestStats {
    requests: AtomicU64,
    rate_limited: AtomicU64,
    errors: AtomicU64,
    last_retry_after_ms: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestStatsSnapshot {
    pub requests: u64,
    pub rate_limited: u64,
    pub errors: u64,
    /// Seconds the server last asked us to wait, if it ever did.
    pub last_retry_after: Option<f64>,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a completed response.
    pub fn record_status(&self, status: u16, retry_after: Option<f64>) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if status == 429 {
            let total = self.rate_limited.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(wait) = retry_after {
                self.last_retry_after_ms
                    .store((wait.max(0.0) * 1000.0).round() as u64, Ordering::Relaxed);
            }
            warn!(total_429 = total, retry_after = ?retry_after, "RIT rate limit hit");
        } else if status >= 400 {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a request that never got a response.
    pub fn record_transport_error(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RequestStatsSnapshot {
        let last_ms = self.last_retry_after_ms.load(Ordering::Relaxed);
        RequestStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_retry_after: (self.rate_limited.load(Ordering::Relaxed) > 0 && last_ms > 0)
                .then(|| last_ms as f64 / 1000.0),
        }
    }
}

impl std::fmt::Debug for RequestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("RequestStats")
            .field("requests", &snap.requests)
            .field("rate_limited", &snap.rate_limited)
            .field("errors", &snap.errors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_status_class() {
        let stats = RequestStats::new();
        stats.record_status(200, None);
        stats.record_status(404, None);
        stats.record_status(429, Some(1.25));
        stats.record_transport_error();

        let snap = stats.snapshot();
        assert_eq!(snap.requests, 4);
        assert_eq!(snap.rate_limited, 1);
        assert_eq!(snap.errors, 2);
        assert_eq!(snap.last_retry_after, Some(1.25));
    }

    #[test]
    fn fresh_stats_are_zero() {
        assert_eq!(RequestStats::new().snapshot(), RequestStatsSnapshot::default());
    }
}
