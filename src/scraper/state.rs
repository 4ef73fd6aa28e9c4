//! Scraper progress kept across restarts in `state.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

/// Last seen prices of one ticker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub mid: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeState {
    #[serde(default)]
    pub last_news_id: Option<u64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub last_prices: BTreeMap<String, PricePoint>,
    /// First `last` price seen per ticker.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub first_prices: BTreeMap<String, f64>,
    #[serde(default)]
    pub last_case: Option<Value>,
    /// Unix seconds of the last tick / period change.
    #[serde(default)]
    pub last_tick_ts: Option<f64>,
    #[serde(default)]
    pub last_period_ts: Option<f64>,
    /// Fingerprint per tender / lease id.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub last_tenders: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub last_leases: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub disabled_endpoints: BTreeSet<String>,
}

/// `null` reads as an empty collection.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ScrapeState {
    /// Load from `path`; a missing file is a fresh state.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scrape state from {}", path.display()))?;
        let state: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse scrape state from {}", path.display()))?;
        debug!(path = %path.display(), last_news_id = ?state.last_news_id, "scrape state loaded");
        Ok(state)
    }

    /// Atomic write: `.tmp` then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("failed to serialise scrape state")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename {} into place", tmp_path.display()))?;
        Ok(())
    }
}
