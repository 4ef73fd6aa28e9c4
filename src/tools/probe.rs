// =============================================================================
// probe / cases: one-shot connectivity check
// =============================================================================

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::credentials::{
    resolve_dma_base_url, AuthHeaders, ConnectionMode, Credentials, CASE_PORTS, DEFAULT_DMA_HOST,
};
use crate::rit::{RitClient, StatusError};
use crate::tools::summarize_book;

#[derive(Debug, Clone, clap::Args)]
pub struct ProbeArgs {
    /// Security ticker
    #[arg(long, default_value = "ABC")]
    pub ticker: String,

    /// Use the local Client REST API instead of DMA
    #[arg(long)]
    pub client: bool,

    /// Send X-API-Key when the creds have one
    #[arg(long)]
    pub use_api_key: bool,

    /// DMA base URL override (e.g. http://flserver:16530)
    #[arg(long)]
    pub dma_base_url: Option<String>,

    /// DMA port override (combined with the DMA host)
    #[arg(long)]
    pub dma_port: Option<u16>,

    /// DMA host override
    #[arg(long)]
    pub dma_host: Option<String>,

    /// Case name used to pick the DMA port
    #[arg(long)]
    pub case: Option<String>,
}

impl ProbeArgs {
    fn mode(&self) -> ConnectionMode {
        if self.client {
            ConnectionMode::Client
        } else {
            ConnectionMode::Dma
        }
    }
}

/// `--client` -> client URL; otherwise the explicit DMA URL, the resolved
/// DMA URL, then `base_url` from the creds.
pub fn probe_base_url(args: &ProbeArgs, creds: &Credentials) -> Option<String> {
    if args.client {
        return Some(creds.client_url().to_string());
    }
    args.dma_base_url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| resolve_dma_base_url(creds, args.case.as_deref(), args.dma_port, args.dma_host.as_deref()))
        .or_else(|| creds.base_url.clone().filter(|u| !u.trim().is_empty()))
}

fn connection_hint(mode: ConnectionMode) -> String {
    match mode {
        ConnectionMode::Dma => format!(
            "Hint: ensure the DMA host resolves ({DEFAULT_DMA_HOST}) and you are on the RIT network/VPN."
        ),
        ConnectionMode::Client => {
            "Hint: ensure the RIT client REST API is running locally and port 9999 is free.".to_string()
        }
    }
}

async fn fetch(client: &RitClient, path: &str, params: &[(&str, &str)]) -> Result<Value> {
    let resp = client.request(Method::GET, path, params).await?;
    resp.into_payload(&Method::GET, path)
}

pub async fn run(args: &ProbeArgs, creds_path: &Path) -> Result<ExitCode> {
    let creds = match Credentials::load(creds_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load creds: {e:#}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let Some(base_url) = probe_base_url(args, &creds) else {
        eprintln!("Missing base_url in creds.");
        return Ok(ExitCode::FAILURE);
    };

    let mode = args.mode();
    let headers = AuthHeaders::lenient(&creds, args.use_api_key);
    let client = RitClient::new(&base_url, mode, &headers)?;
    debug!(base = %client.base_url(), %mode, "probing");

    let result = async {
        let case = fetch(&client, "/v1/case", &[]).await?;
        let book = fetch(&client, "/v1/securities/book", &[("ticker", args.ticker.as_str())]).await?;
        anyhow::Ok((case, book))
    }
    .await;

    match result {
        Ok((case, book)) => {
            println!("Base URL: {base_url}");
            println!("Case: {case}");
            println!("Book ({}): {}", args.ticker, summarize_book(&book));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if let Some(status) = StatusError::status_of(&e) {
                eprintln!("HTTP error: {status} ({e})");
            } else {
                eprintln!("Connection error: {e:#}");
                eprintln!("{}", connection_hint(mode));
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

// =============================================================================
// cases
// =============================================================================

pub fn case_lines() -> Vec<String> {
    CASE_PORTS
        .iter()
        .map(|(name, case_port, dma_port)| {
            let dma = dma_port.map_or_else(|| "none".to_string(), |p| p.to_string());
            format!("{name}: case_port={case_port}, dma_port={dma}")
        })
        .collect()
}

pub fn list_cases() -> ExitCode {
    for line in case_lines() {
        println!("{line}");
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::rit::test_support::serve;

    fn args() -> ProbeArgs {
        ProbeArgs {
            ticker: "ABC".into(),
            client: false,
            use_api_key: false,
            dma_base_url: None,
            dma_port: None,
            dma_host: None,
            case: None,
        }
    }

    #[test]
    fn base_url_resolution_order() {
        let creds = Credentials::default();
        // Default case maps to its DMA port on the default host.
        assert_eq!(
            probe_base_url(&args(), &creds).as_deref(),
            Some("http://flserver.rotman.utoronto.ca:16530")
        );

        let mut a = args();
        a.dma_port = Some(1234);
        a.dma_host = Some("h".into());
        assert_eq!(probe_base_url(&a, &creds).as_deref(), Some("http://h:1234"));

        a.dma_base_url = Some("http://explicit:1".into());
        assert_eq!(probe_base_url(&a, &creds).as_deref(), Some("http://explicit:1"));

        let mut a = args();
        a.case = Some("GBE Energy Electricity Trading Case".into());
        let creds = Credentials {
            base_url: Some("http://fallback:2".into()),
            ..Default::default()
        };
        assert_eq!(probe_base_url(&a, &creds).as_deref(), Some("http://fallback:2"));

        a.client = true;
        assert_eq!(probe_base_url(&a, &creds).as_deref(), Some("http://localhost:9999"));
    }

    #[test]
    fn case_table_lines() {
        let lines = case_lines();
        assert_eq!(lines.len(), CASE_PORTS.len());
        assert_eq!(lines[0], "Liquidity Risk Case: case_port=16500, dma_port=16510");
        assert!(lines.contains(&"GBE Energy Electricity Trading Case: case_port=16555, dma_port=none".to_string()));
    }

    #[test]
    fn hints_name_the_mode() {
        assert!(connection_hint(ConnectionMode::Dma).contains(DEFAULT_DMA_HOST));
        assert!(connection_hint(ConnectionMode::Client).contains("9999"));
    }

    #[tokio::test]
    async fn probe_against_fake_server() {
        let app = Router::new()
            .route("/v1/case", get(|| async { Json(json!({"name": "Demo", "tick": 3})) }))
            .route(
                "/v1/securities/book",
                get(|| async { Json(json!({"bids": [{"price": 9.9}], "asks": [{"price": 10.1}]})) }),
            );
        let base = serve(app).await;

        let path = std::env::temp_dir().join(format!("rit-desk-probe-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, format!(r#"{{"username": "u", "password": "p", "dma_base_url": "{base}"}}"#)).unwrap();
        let code = run(&args(), &path).await.unwrap();
        assert_eq!(code, ExitCode::SUCCESS);

        let missing = std::env::temp_dir().join(format!("rit-desk-missing-{}.json", uuid::Uuid::new_v4()));
        assert_eq!(run(&args(), &missing).await.unwrap(), ExitCode::FAILURE);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn probe_reports_http_failures() {
        let base = serve(Router::new()).await;
        let path = std::env::temp_dir().join(format!("rit-desk-probe-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, format!(r#"{{"dma_base_url": "{base}"}}"#)).unwrap();
        assert_eq!(run(&args(), &path).await.unwrap(), ExitCode::FAILURE);
        let _ = std::fs::remove_file(&path);
    }
}
