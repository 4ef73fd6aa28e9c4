// =============================================================================
// watch: live order-book printer and rate-limit probe
// =============================================================================

use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Result};
use reqwest::Method;
use serde_json::Value;
use tracing::warn;

use crate::credentials::{AuthHeaders, ConnectionMode, Credentials};
use crate::rit::{capped_wait, RitClient, MAX_RETRY_WAIT};
use crate::tools::{format_book_pretty, pause, rate};

const BOOK_PATH: &str = "/v1/securities/book";
/// Wait after a 429 that carries no hint.
const RATE_LIMIT_FALLBACK_SECS: f64 = 1.0;
const MIN_INTERVAL_SECS: f64 = 0.05;
const MIN_ERROR_INTERVAL_SECS: f64 = 0.2;
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[derive(Debug, Clone, clap::Args)]
pub struct WatchArgs {
    #[arg(long, default_value = "ABC")]
    pub ticker: String,

    /// Poll interval in seconds
    #[arg(long, default_value_t = 0.5)]
    pub interval: f64,

    /// Book depth to request and display
    #[arg(long, default_value_t = 5)]
    pub depth: u32,

    /// Do not clear the screen between updates
    #[arg(long)]
    pub no_clear: bool,

    /// Use the local Client REST API instead of DMA
    #[arg(long)]
    pub client: bool,

    /// Override the base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Request books back to back until the server rate-limits
    #[arg(long)]
    pub test_rate: bool,

    /// Request budget of --test-rate
    #[arg(long, default_value_t = 5000)]
    pub max_requests: u64,
}

fn watch_base_url(args: &WatchArgs, creds: &Credentials) -> Result<String> {
    if let Some(url) = args.base_url.as_ref().filter(|u| !u.trim().is_empty()) {
        return Ok(url.clone());
    }
    if args.client {
        return Ok(creds.client_url().to_string());
    }
    match creds.direct_dma_url() {
        Some(url) => Ok(url.to_string()),
        None => bail!("missing dma_base_url/base_url in creds, use --base-url"),
    }
}

fn build_client(args: &WatchArgs, creds: &Credentials) -> Result<RitClient> {
    let mode = if args.client {
        ConnectionMode::Client
    } else {
        ConnectionMode::Dma
    };
    let base_url = watch_base_url(args, creds)?;
    let headers = AuthHeaders::for_mode(creds, mode)?;
    RitClient::new(base_url, mode, &headers)
}

// =============================================================================
// Rate test
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RateOutcome {
    /// The server answered 429; carries its wait hint in seconds.
    Limited { wait: f64 },
    /// Some other non-2xx answer.
    Failed { status: u16, body: Value },
    /// The request budget ran out first.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct RateReport {
    pub count: u64,
    pub elapsed_secs: f64,
    pub outcome: RateOutcome,
}

/// Fire `limit=1` book requests until a 429, an error or `max_requests`.
pub async fn rate_test(client: &RitClient, ticker: &str, max_requests: u64) -> Result<RateReport> {
    let params = [("ticker", ticker), ("limit", "1")];
    let start = Instant::now();
    let mut count = 0;
    let mut outcome = RateOutcome::Exhausted;

    while count < max_requests {
        let resp = client.request(Method::GET, BOOK_PATH, &params).await?;
        count += 1;
        if resp.is_rate_limited() {
            outcome = RateOutcome::Limited {
                wait: resp.retry_after.unwrap_or(RATE_LIMIT_FALLBACK_SECS),
            };
            break;
        }
        if !resp.is_success() {
            outcome = RateOutcome::Failed {
                status: resp.status,
                body: resp.payload,
            };
            break;
        }
    }

    Ok(RateReport {
        count,
        elapsed_secs: start.elapsed().as_secs_f64(),
        outcome,
    })
}

fn print_rate_report(report: &RateReport) -> ExitCode {
    let (elapsed, rps) = rate(report.count, report.elapsed_secs);
    match &report.outcome {
        RateOutcome::Limited { wait } => {
            println!(
                "Rate limited after {} requests in {elapsed:.3}s (~{rps:.1} req/s).",
                report.count
            );
            println!("Retry-After / wait: {wait}s");
            ExitCode::SUCCESS
        }
        RateOutcome::Failed { status, body } => {
            println!("HTTP {status}: {body}");
            ExitCode::FAILURE
        }
        RateOutcome::Exhausted => {
            println!(
                "No 429 within {} requests in {elapsed:.3}s (~{rps:.1} req/s).",
                report.count
            );
            ExitCode::SUCCESS
        }
    }
}

// =============================================================================
// Watch loop
// =============================================================================

pub async fn run(args: &WatchArgs, creds_path: &Path) -> Result<ExitCode> {
    let creds = Credentials::load_or_default(creds_path)?;
    let client = match build_client(args, &creds) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e:#}");
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.test_rate {
        let report = rate_test(&client, &args.ticker, args.max_requests).await?;
        return Ok(print_rate_report(&report));
    }

    let depth = args.depth.to_string();
    let params = [("ticker", args.ticker.as_str()), ("limit", depth.as_str())];
    let clear = || {
        if !args.no_clear {
            print!("{CLEAR_SCREEN}");
        }
    };

    loop {
        let resp = match client.request(Method::GET, BOOK_PATH, &params).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "book request failed");
                if !pause(args.interval.max(MIN_ERROR_INTERVAL_SECS)).await {
                    break;
                }
                continue;
            }
        };

        if resp.is_rate_limited() {
            let hint = resp.retry_after.unwrap_or(RATE_LIMIT_FALLBACK_SECS);
            let wait = capped_wait(hint, MAX_RETRY_WAIT).as_secs_f64();
            clear();
            println!("Rate limited (429). Waiting {wait:.2}s...");
            if !pause(wait).await {
                break;
            }
            continue;
        }

        clear();
        if !resp.is_success() {
            println!("HTTP {}: {}", resp.status, resp.payload);
            if !pause(args.interval.max(MIN_ERROR_INTERVAL_SECS)).await {
                break;
            }
            continue;
        }

        println!("Base: {}", client.base_url());
        println!("Ticker: {}", args.ticker);
        println!("Updated: {}", chrono::Local::now().format("%H:%M:%S"));
        println!();
        println!("{}", format_book_pretty(&resp.payload, args.depth as usize));

        if !pause(args.interval.max(MIN_INTERVAL_SECS)).await {
            break;
        }
    }
    Ok(ExitCode::SUCCESS)
}
