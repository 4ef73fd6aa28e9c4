// =============================================================================
// rit-desk: Main Entry Point
// =============================================================================
//
// One binary, several subcommands:
//   dashboard   poll RIT and serve desk state over HTTP + WebSocket
//   relay       CORS pass-through for browsers
//   probe       case + top of book, one shot
//   cases       known case / DMA port table
//   watch       live order-book printer (optionally a rate-limit probe)
//   speed-test  sequential request throughput
//   scrape      JSONL market recorder
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod credentials;
mod indicators;
mod market_data;
mod poller;
mod positions;
mod relay;
mod rit;
mod runtime_config;
mod scraper;
mod tools;
mod types;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::auth::{admin_token_from_env, ADMIN_TOKEN_ENV};
use crate::app_state::DeskState;
use crate::credentials::{creds_path, resolve_base_url, resolve_mode, AuthHeaders, ConnectionMode, Credentials};
use crate::relay::RelayConfig;
use crate::rit::RitClient;
use crate::runtime_config::{parse_ticker_list, RuntimeConfig};
use crate::scraper::ScrapeArgs;
use crate::tools::probe::ProbeArgs;
use crate::tools::speed_test::SpeedTestArgs;
use crate::tools::watch::WatchArgs;

const DEFAULT_CONFIG_PATH: &str = "desk_config.json";

#[derive(Parser)]
#[command(name = "rit-desk", author, version, about = "Trading desk tools for the RIT REST API")]
struct Cli {
    /// Credentials JSON (default: $RIT_CREDS_PATH or creds/rit_rest.json)
    #[arg(long, global = true)]
    creds: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll RIT and serve desk state over HTTP and WebSocket
    Dashboard(DashboardArgs),
    /// CORS relay in front of the RIT REST API
    Relay(RelayArgs),
    /// Fetch case status and top of book once
    Probe(ProbeArgs),
    /// List known cases and their ports
    Cases,
    /// Print the order book as it changes
    Watch(WatchArgs),
    /// Measure sequential book request throughput
    SpeedTest(SpeedTestArgs),
    /// Record case, securities, books, news, tenders and leases to JSONL
    Scrape(ScrapeArgs),
}

#[derive(clap::Args)]
struct DashboardArgs {
    /// Dashboard settings JSON
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[arg(long, value_enum)]
    mode: Option<ConnectionMode>,

    /// Override the RIT base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Listen address of the dashboard API
    #[arg(long)]
    bind: Option<String>,

    /// Comma-separated tickers to track (default: all)
    #[arg(long)]
    tickers: Option<String>,

    /// Write the effective settings to --config and exit
    #[arg(long)]
    write_config: bool,
}

#[derive(clap::Args)]
struct RelayArgs {
    /// Listen address
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let creds_file = creds_path(cli.creds.as_deref());

    match cli.command {
        Command::Dashboard(args) => run_dashboard(args, &creds_file).await,
        Command::Relay(args) => {
            let creds = Credentials::load_or_default(&creds_file)?;
            relay::run(RelayConfig::from_credentials(&creds, args.bind)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Probe(args) => tools::probe::run(&args, &creds_file).await,
        Command::Cases => Ok(tools::probe::list_cases()),
        Command::Watch(args) => tools::watch::run(&args, &creds_file).await,
        Command::SpeedTest(args) => tools::speed_test::run(&args, &creds_file).await,
        Command::Scrape(args) => scraper::run(&args, &creds_file).await,
    }
}

async fn run_dashboard(args: DashboardArgs, creds_file: &Path) -> anyhow::Result<ExitCode> {
    // ── 2. Settings ──────────────────────────────────────────────────────
    let mut config = RuntimeConfig::load(&args.config).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load dashboard config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(list) = args.tickers.as_deref() {
        config.tickers = parse_ticker_list(list);
    }

    if args.write_config {
        config.save(&args.config)?;
        println!("Wrote {}", args.config.display());
        return Ok(ExitCode::SUCCESS);
    }

    // ── 3. RIT client ────────────────────────────────────────────────────
    let creds = Credentials::load_or_default(creds_file)?;
    let mode = resolve_mode(&creds, args.mode);
    let base_url = resolve_base_url(&creds, mode, args.base_url.as_deref())?;
    let headers = AuthHeaders::for_mode(&creds, mode)
        .with_context(|| format!("credentials in {} are incomplete", creds_file.display()))?;
    let client = RitClient::new(&base_url, mode, &headers)?;

    info!(%mode, base = %base_url, tickers = ?config.tickers, "Connecting to RIT");
    let admin_token = admin_token_from_env();
    if admin_token.is_none() {
        warn!("{ADMIN_TOKEN_ENV} not set: order entry and the WebSocket feed are disabled");
    }

    // ── 4. Shared state & pollers ────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(DeskState::new(config, client).with_admin_token(admin_token));
    let (fast, slow) = poller::spawn(state.clone());

    // ── 5. API server ────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    axum::serve(listener, api::rest::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            warn!("Shutdown signal received, stopping gracefully");
        })
        .await
        .context("API server error")?;

    fast.abort();
    slow.abort();
    info!("rit-desk dashboard shut down");
    Ok(ExitCode::SUCCESS)
}
