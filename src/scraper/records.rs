//! JSONL output and change detection for id-keyed collections.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Files written under the output directory.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub snapshots: PathBuf,
    pub books: PathBuf,
    pub news: PathBuf,
    pub tenders: PathBuf,
    pub leases: PathBuf,
    pub case_events: PathBuf,
    pub state: PathBuf,
}

impl OutputPaths {
    pub fn new(out_dir: impl AsRef<Path>) -> Self {
        let dir = out_dir.as_ref();
        Self {
            snapshots: dir.join("snapshots.jsonl"),
            books: dir.join("books.jsonl"),
            news: dir.join("news.jsonl"),
            tenders: dir.join("tenders.jsonl"),
            leases: dir.join("leases.jsonl"),
            case_events: dir.join("case_events.jsonl"),
            state: dir.join("state.json"),
        }
    }
}

/// Append one compact JSON line to `path`, creating directories as needed.
pub fn write_jsonl(path: &Path, record: &Value) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{record}").with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

/// SHA-256 (hex) of the compact JSON text. `serde_json` maps keep their
/// keys sorted, so equal objects hash equal regardless of field order.
pub fn fingerprint(item: &Value) -> String {
    hex::encode(Sha256::digest(item.to_string().as_bytes()))
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Write items whose fingerprint differs from the stored one, as
/// `{"ts": .., <label>: item}` lines. Items without `id_key` are skipped.
/// Returns the number written.
pub fn record_items(
    items: &[Value],
    fingerprints: &mut BTreeMap<String, String>,
    path: &Path,
    now_str: &str,
    id_key: &str,
    label: &str,
) -> Result<usize> {
    let mut written = 0;
    for item in items {
        let Some(id) = item.get(id_key).filter(|v| !v.is_null()) else {
            continue;
        };
        let key = id_string(id);
        let fp = fingerprint(item);
        if fingerprints.get(&key) == Some(&fp) {
            continue;
        }
        write_jsonl(path, &json!({ "ts": now_str, label: item }))?;
        fingerprints.insert(key, fp);
        written += 1;
    }
    Ok(written)
}
