// =============================================================================
// Runtime Configuration: dashboard polling and indicator settings
// =============================================================================
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::indicators::IndicatorParams;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_slow_poll_interval_ms() -> u64 {
    2000
}

fn default_book_depth() -> u32 {
    20
}

fn default_history_limit() -> usize {
    300
}

fn default_ladder_levels() -> usize {
    10
}

fn default_tick_size() -> f64 {
    0.01
}

fn default_news_limit() -> u32 {
    50
}

fn default_max_news() -> usize {
    200
}

fn default_bind_addr() -> String {
    "0.0.0.0:3002".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Settings of the dashboard service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Tickers to track. Empty means every security the server lists.
    #[serde(default)]
    pub tickers: Vec<String>,

    /// Fast poll loop period (case, securities, books, orders).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Slow poll loop period (news, tenders, trader, limits).
    #[serde(default = "default_slow_poll_interval_ms")]
    pub slow_poll_interval_ms: u64,

    /// Levels per side requested from the book endpoint.
    #[serde(default = "default_book_depth")]
    pub book_depth: u32,

    /// Bars kept per ticker.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Ladder rows on each side of the center price.
    #[serde(default = "default_ladder_levels")]
    pub ladder_levels: usize,

    /// Price increment of the ladder grid.
    #[serde(default = "default_tick_size")]
    pub tick_size: f64,

    /// News items requested per poll.
    #[serde(default = "default_news_limit")]
    pub news_limit: u32,

    /// News items retained in memory.
    #[serde(default = "default_max_news")]
    pub max_news: usize,

    #[serde(default)]
    pub indicators: IndicatorParams,

    /// Address of the dashboard HTTP API.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            poll_interval_ms: default_poll_interval_ms(),
            slow_poll_interval_ms: default_slow_poll_interval_ms(),
            book_depth: default_book_depth(),
            history_limit: default_history_limit(),
            ladder_levels: default_ladder_levels(),
            tick_size: default_tick_size(),
            news_limit: default_news_limit(),
            max_news: default_max_news(),
            indicators: IndicatorParams::default(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            tickers = ?config.tickers,
            poll_interval_ms = config.poll_interval_ms,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `RIT_DESK_TICKERS` and `RIT_DESK_BIND_ADDR` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(list) = std::env::var("RIT_DESK_TICKERS") {
            self.tickers = parse_ticker_list(&list);
        }
        if let Ok(addr) = std::env::var("RIT_DESK_BIND_ADDR") {
            if !addr.trim().is_empty() {
                self.bind_addr = addr.trim().to_string();
            }
        }
    }
}

/// Split a comma list into upper-cased, non-empty tickers.
pub fn parse_ticker_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
