// =============================================================================
// Scraper: record RIT market data to JSONL
// =============================================================================
//
// Each poll writes:
//   - case events (start, case/status/period/tick changes),
//   - one enriched securities snapshot,
//   - books of the selected tickers,
//   - news since the stored cursor,
//   - tenders and leases whose content changed,
// then persists `ScrapeState` so a restart continues where it stopped.
//
// 401 and transport failures are fatal; other bad statuses skip the part
// of the cycle they affect.
// =============================================================================

pub mod enrich;
pub mod records;
pub mod state;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::credentials::{resolve_base_url, resolve_mode, AuthHeaders, ConnectionMode, Credentials};
use crate::rit::client::DEFAULT_RETRIES;
use crate::rit::{RitClient, RitResponse};
use crate::tools::pause;

pub use enrich::{detect_case_events, enrich_securities};
pub use records::{fingerprint, record_items, write_jsonl, OutputPaths};
pub use state::ScrapeState;

const TENDERS: &str = "tenders";
const LEASES: &str = "leases";

#[derive(Debug, Clone, clap::Args)]
pub struct ScrapeArgs {
    /// Connection mode; by default DMA unless the creds only hold an API key
    #[arg(long, value_enum)]
    pub mode: Option<ConnectionMode>,

    /// Override the REST base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Seconds between polls
    #[arg(long, default_value_t = 1.0)]
    pub interval: f64,

    /// Run a single poll and exit
    #[arg(long)]
    pub once: bool,

    #[arg(long, default_value = "out")]
    pub out_dir: PathBuf,

    /// Book depth per side
    #[arg(long, default_value_t = 10)]
    pub book_limit: u32,

    /// Comma-separated tickers to pull books for (default: all)
    #[arg(long)]
    pub book_tickers: Option<String>,

    /// Max number of tickers to pull books for
    #[arg(long)]
    pub book_max: Option<usize>,

    /// Seconds between book requests
    #[arg(long, default_value_t = 0.0)]
    pub book_delay: f64,

    #[arg(long)]
    pub skip_books: bool,

    /// News items per poll
    #[arg(long, default_value_t = 20)]
    pub news_limit: u32,

    #[arg(long)]
    pub skip_news: bool,

    #[arg(long)]
    pub skip_tenders: bool,

    #[arg(long)]
    pub skip_leases: bool,
}

/// What one poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollSummary {
    /// The cycle stopped early on a bad case or securities answer.
    pub skipped: bool,
    pub events: usize,
    pub books: usize,
    pub news: usize,
    pub tenders: usize,
    pub leases: usize,
}

pub fn select_book_tickers(all: &[String], book_tickers: Option<&str>, book_max: Option<usize>) -> Vec<String> {
    let mut tickers: Vec<String> = match book_tickers {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        None => all.to_vec(),
    };
    if let Some(max) = book_max {
        tickers.truncate(max);
    }
    tickers
}

/// 401 is fatal for every call.
fn ensure_authorized(resp: &RitResponse, label: &str) -> Result<()> {
    if resp.status == 401 {
        bail!("unauthorized for {label}, check credentials");
    }
    Ok(())
}

async fn get(client: &RitClient, path: &str, params: &[(&str, String)], label: &str) -> Result<RitResponse> {
    client
        .request_with_retry(Method::GET, path, params, DEFAULT_RETRIES)
        .await
        .with_context(|| format!("connection error while fetching {label}"))
}

fn now() -> (f64, String) {
    let now = Utc::now();
    (now.timestamp_millis() as f64 / 1000.0, now.to_rfc3339())
}

pub async fn poll_once(
    client: &RitClient,
    paths: &OutputPaths,
    state: &mut ScrapeState,
    args: &ScrapeArgs,
    run_id: &str,
) -> Result<PollSummary> {
    let (now_ts, now_str) = now();
    let mut summary = PollSummary::default();

    // ── Case ────────────────────────────────────────────────────────────
    let resp = get(client, "/v1/case", &[], "case").await?;
    ensure_authorized(&resp, "case")?;
    if !resp.is_success() {
        warn!(status = resp.status, "case fetch failed, skipping cycle");
        summary.skipped = true;
        return Ok(summary);
    }
    let case = resp.payload;

    for event in detect_case_events(state, &case, now_ts, &now_str) {
        write_jsonl(&paths.case_events, &event)?;
        summary.events += 1;
    }

    // ── Securities snapshot ─────────────────────────────────────────────
    let resp = get(client, "/v1/securities", &[], "securities").await?;
    ensure_authorized(&resp, "securities")?;
    let securities = match (resp.is_success(), resp.payload) {
        (true, Value::Array(list)) => list,
        _ => {
            warn!(status = resp.status, "securities fetch failed, skipping cycle");
            summary.skipped = true;
            return Ok(summary);
        }
    };

    let enriched = enrich_securities(&securities, state);
    let tickers: Vec<String> = securities
        .iter()
        .filter_map(|s| s.get("ticker").and_then(Value::as_str))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    write_jsonl(
        &paths.snapshots,
        &json!({
            "ts": now_str,
            "run_id": run_id,
            "case": case,
            "tickers": tickers,
            "securities": enriched,
        }),
    )?;

    // ── Books ───────────────────────────────────────────────────────────
    if !args.skip_books {
        for ticker in select_book_tickers(&tickers, args.book_tickers.as_deref(), args.book_max) {
            let params = [("ticker", ticker.clone()), ("limit", args.book_limit.to_string())];
            let label = format!("book:{ticker}");
            let resp = get(client, "/v1/securities/book", &params, &label).await?;
            if resp.is_rate_limited() {
                warn!(ticker = %ticker, "rate-limited on book");
                continue;
            }
            ensure_authorized(&resp, &label)?;
            if resp.is_success() {
                write_jsonl(&paths.books, &json!({ "ts": now_str, "ticker": ticker, "book": resp.payload }))?;
                summary.books += 1;
            }
            if args.book_delay > 0.0 {
                let delay = Duration::try_from_secs_f64(args.book_delay).unwrap_or(Duration::MAX);
                tokio::time::sleep(delay).await;
            }
        }
    }

    // ── News ────────────────────────────────────────────────────────────
    if !args.skip_news {
        let mut params = vec![("limit", args.news_limit.to_string())];
        if let Some(id) = state.last_news_id {
            params.push((client.news_cursor_param(), id.to_string()));
        }
        let resp = get(client, "/v1/news", &params, "news").await?;
        ensure_authorized(&resp, "news")?;
        if let (true, Value::Array(mut items)) = (resp.is_success(), resp.payload) {
            items.sort_by_key(|item| item.get("news_id").and_then(Value::as_u64).unwrap_or(0));
            for item in items {
                if let Some(id) = item.get("news_id").and_then(Value::as_u64) {
                    state.last_news_id = Some(state.last_news_id.map_or(id, |prev| prev.max(id)));
                }
                write_jsonl(&paths.news, &json!({ "ts": now_str, "news": item }))?;
                summary.news += 1;
            }
        }
    }

    // ── Tenders / leases ────────────────────────────────────────────────
    if !args.skip_tenders && !state.disabled_endpoints.contains(TENDERS) {
        if let Some(items) = fetch_optional_list(client, state, "/v1/tenders", TENDERS).await? {
            summary.tenders =
                record_items(&items, &mut state.last_tenders, &paths.tenders, &now_str, "tender_id", "tender")?;
        }
    }
    if !args.skip_leases && !state.disabled_endpoints.contains(LEASES) {
        if let Some(items) = fetch_optional_list(client, state, "/v1/leases", LEASES).await? {
            summary.leases = record_items(&items, &mut state.last_leases, &paths.leases, &now_str, "id", "lease")?;
        }
    }

    state.save(&paths.state)?;
    Ok(summary)
}

/// A list endpoint the server may not offer: 404 disables it for good.
async fn fetch_optional_list(
    client: &RitClient,
    state: &mut ScrapeState,
    path: &str,
    name: &str,
) -> Result<Option<Vec<Value>>> {
    let resp = get(client, path, &[], name).await?;
    if resp.status == 404 {
        info!(endpoint = name, "endpoint not available, disabling");
        state.disabled_endpoints.insert(name.to_string());
        return Ok(None);
    }
    ensure_authorized(&resp, name)?;
    match (resp.is_success(), resp.payload) {
        (true, Value::Array(items)) => Ok(Some(items)),
        _ => Ok(None),
    }
}

pub async fn run(args: &ScrapeArgs, creds_path: &Path) -> Result<ExitCode> {
    let creds = Credentials::load(creds_path)?;
    let mode = resolve_mode(&creds, args.mode);
    let base_url = resolve_base_url(&creds, mode, args.base_url.as_deref())?;
    let headers = AuthHeaders::for_mode(&creds, mode)?;
    let client = RitClient::new(&base_url, mode, &headers)?;

    let paths = OutputPaths::new(&args.out_dir);
    let mut state = ScrapeState::load(&paths.state)?;
    let run_id = Uuid::new_v4().to_string();

    info!(%mode, base = %base_url, out_dir = %args.out_dir.display(), %run_id, "scraper started");
    println!("Scraping via {mode} at {base_url}");

    loop {
        let summary = poll_once(&client, &paths, &mut state, args, &run_id).await?;
        info!(
            skipped = summary.skipped,
            events = summary.events,
            books = summary.books,
            news = summary.news,
            tenders = summary.tenders,
            leases = summary.leases,
            "poll recorded"
        );
        if args.once || !pause(args.interval).await {
            break;
        }
    }
    Ok(ExitCode::SUCCESS)
}
