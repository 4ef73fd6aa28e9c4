// =============================================================================
// speed-test: sequential book requests against the DMA endpoint
// =============================================================================

use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use reqwest::Method;

use crate::credentials::{AuthHeaders, ConnectionMode, Credentials};
use crate::rit::RitClient;
use crate::tools::rate;

#[derive(Debug, Clone, clap::Args)]
pub struct SpeedTestArgs {
    #[arg(long, default_value = "CRZY")]
    pub ticker: String,

    /// Number of book requests
    #[arg(long, default_value_t = 500)]
    pub requests: u64,

    /// Progress line every N requests
    #[arg(long, default_value_t = 25)]
    pub print_every: u64,
}

/// Issue `requests` book calls, reporting `(done, req/s)` every
/// `print_every`. Returns the elapsed seconds. Any non-2xx answer aborts.
pub async fn measure<F>(
    client: &RitClient,
    ticker: &str,
    requests: u64,
    print_every: u64,
    mut on_progress: F,
) -> Result<f64>
where
    F: FnMut(u64, f64),
{
    let path = "/v1/securities/book";
    let params = [("ticker", ticker), ("limit", "1")];
    let start = Instant::now();

    for i in 1..=requests {
        client
            .request(Method::GET, path, &params)
            .await?
            .into_payload(&Method::GET, path)
            .with_context(|| format!("request {i} of {requests} failed"))?;
        if print_every > 0 && i % print_every == 0 {
            let (_, rps) = rate(i, start.elapsed().as_secs_f64());
            on_progress(i, rps);
        }
    }
    Ok(start.elapsed().as_secs_f64())
}

pub fn summary_line(requests: u64, elapsed_secs: f64) -> String {
    let (elapsed, rps) = rate(requests, elapsed_secs);
    format!("{requests} requests in {elapsed:.3}s -> {rps:.1} req/s")
}

pub async fn run(args: &SpeedTestArgs, creds_path: &Path) -> Result<ExitCode> {
    let creds = Credentials::load_or_default(creds_path)?;
    let Some(base_url) = creds.direct_dma_url() else {
        eprintln!("Missing dma_base_url/base_url in creds.");
        return Ok(ExitCode::FAILURE);
    };
    let headers = match AuthHeaders::for_mode(&creds, ConnectionMode::Dma) {
        Ok(h) => h,
        Err(_) => {
            eprintln!("Missing authorization_header or username/password in creds.");
            return Ok(ExitCode::FAILURE);
        }
    };
    let client = RitClient::new(base_url, ConnectionMode::Dma, &headers)?;

    let elapsed = measure(&client, &args.ticker, args.requests, args.print_every, |done, rps| {
        println!("{done} requests, current speed {rps:.1} req/s");
    })
    .await?;
    println!("{}", summary_line(args.requests, elapsed));
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::rit::test_support::serve;

    fn client(base: &str) -> RitClient {
        RitClient::new(base, ConnectionMode::Dma, &AuthHeaders::default()).unwrap()
    }

    #[test]
    fn summary_format() {
        assert_eq!(summary_line(500, 2.0), "500 requests in 2.000s -> 250.0 req/s");
    }

    #[tokio::test]
    async fn progress_every_n() {
        let app = Router::new().route("/v1/securities/book", get(|| async { Json(json!({"bids": []})) }));
        let base = serve(app).await;

        let mut seen = Vec::new();
        measure(&client(&base), "CRZY", 10, 4, |done, _| seen.push(done)).await.unwrap();
        assert_eq!(seen, vec![4, 8]);
    }

    #[tokio::test]
    async fn aborts_on_http_error() {
        let base = serve(Router::new()).await;
        let err = measure(&client(&base), "CRZY", 10, 5, |_, _| {}).await.unwrap_err();
        assert!(format!("{err:#}").contains("request 1 of 10"));
    }
}
