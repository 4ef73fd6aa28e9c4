// =============================================================================
// Poller: keeps DeskState in sync with the RIT server
// =============================================================================
//
// Two loops share one client:
//   - fast (poll_interval_ms): case, securities, books, history, TAS,
//     orders, indicators. Open and transacted orders are read every cycle
//     so an order that fills completely between two polls still reaches
//     the fill tape; cancelled ones only when an open order vanished.
//   - slow (slow_poll_interval_ms): news, tenders, leases, trader, limits.
//
// A failed cycle is recorded on the state and the next one waits
// interval * 2^failures, capped at MAX_BACKOFF. The first success resets it.
// Optional endpoints answering 404 are switched off for the rest of the run.
// =============================================================================

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::app_state::DeskState;
use crate::rit::StatusError;
use crate::runtime_config::RuntimeConfig;
use crate::types::OrderStatus;

pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Endpoints the server may not offer.
pub const TENDERS: &str = "tenders";
pub const LEASES: &str = "leases";
pub const LIMITS: &str = "limits";
pub const HISTORY: &str = "history";
pub const TAS: &str = "tas";

/// Delay before the next cycle after `failures` consecutive failures.
pub fn backoff_delay(interval: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return interval;
    }
    let factor = 1u32 << failures.min(16);
    interval.saturating_mul(factor).min(MAX_BACKOFF.max(interval))
}

/// Spawn both loops. They run until the runtime shuts down.
pub fn spawn(state: Arc<DeskState>) -> (JoinHandle<()>, JoinHandle<()>) {
    let fast = tokio::spawn(run_loop(
        state.clone(),
        "fast_poll",
        |cfg| cfg.poll_interval_ms,
        fast_cycle,
    ));
    let slow = tokio::spawn(run_loop(
        state,
        "slow_poll",
        |cfg| cfg.slow_poll_interval_ms,
        slow_cycle,
    ));
    (fast, slow)
}

async fn run_loop<F, Fut>(
    state: Arc<DeskState>,
    name: &'static str,
    interval_of: fn(&RuntimeConfig) -> u64,
    cycle: F,
) where
    F: Fn(Arc<DeskState>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut failures = 0u32;
    info!(loop_name = name, "poll loop started");
    loop {
        let interval_ms = interval_of(&state.config.read()).max(50);
        let outcome = cycle(state.clone()).await;
        let delay = settle(&state, name, Duration::from_millis(interval_ms), outcome, &mut failures);
        tokio::time::sleep(delay).await;
    }
}

/// Book the outcome of one cycle and return how long to wait.
fn settle(
    state: &DeskState,
    name: &str,
    interval: Duration,
    outcome: Result<()>,
    failures: &mut u32,
) -> Duration {
    match outcome {
        Ok(()) => {
            if *failures > 0 {
                info!(loop_name = name, after = *failures, "RIT polling recovered");
            }
            *failures = 0;
            state.record_ok();
        }
        Err(e) => {
            *failures = failures.saturating_add(1);
            let message = format!("{e:#}");
            warn!(loop_name = name, failures = *failures, error = %message, "poll cycle failed");
            state.record_failure(name, message);
        }
    }
    backoff_delay(interval, *failures)
}

/// Pass successes through; a 404 disables `endpoint` and yields `None`.
fn optional<T>(state: &DeskState, endpoint: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if StatusError::status_of(&e) == Some(404) => {
            state.disable_endpoint(endpoint);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

// =============================================================================
// Fast cycle
// =============================================================================

pub async fn fast_cycle(state: Arc<DeskState>) -> Result<()> {
    let client = &state.client;

    let case = client.case().await.context("case")?;
    let transition = state.set_case(case);
    if transition.resets_session() {
        info!(?transition, "session reset");
    }

    let securities = client.securities().await.context("securities")?;
    state.set_securities(securities);

    let (depth, history_limit) = {
        let cfg = state.config.read();
        (cfg.book_depth, cfg.history_limit)
    };

    for ticker in state.tracked_tickers() {
        let book = client
            .book(&ticker, depth)
            .await
            .with_context(|| format!("book {ticker}"))?;
        state.update_book(&ticker, book);

        poll_history(&state, &ticker, history_limit).await?;
        poll_tape(&state, &ticker).await?;
        state.recompute_indicators(&ticker);
    }

    let open = client.orders(Some(OrderStatus::Open)).await.context("orders")?;
    let mut closed = client
        .orders(Some(OrderStatus::Transacted))
        .await
        .context("transacted orders")?;
    if state.open_orders_vanished(&open, &closed) {
        let cancelled = client
            .orders(Some(OrderStatus::Cancelled))
            .await
            .context("cancelled orders")?;
        closed.extend(cancelled);
    }
    state.set_orders(open, closed);
    state.reconcile_positions();
    Ok(())
}

/// Merge server bars; without them, record the current price at the
/// current tick.
async fn poll_history(state: &DeskState, ticker: &str, limit: usize) -> Result<()> {
    let mut merged = false;
    if !state.is_disabled(HISTORY) {
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        let result = state.client.history(ticker, Some(limit)).await;
        match optional(state, HISTORY, result) {
            Ok(Some(bars)) if !bars.is_empty() => {
                state.history.merge(ticker, &bars);
                merged = true;
            }
            Ok(_) => {}
            Err(e) => debug!(ticker, error = %e, "history unavailable, using last price"),
        }
    }

    if !merged {
        let price = state
            .securities
            .read()
            .iter()
            .find(|s| s.ticker == ticker)
            .and_then(|s| s.last.or_else(|| s.mid()));
        if let Some(price) = price {
            state.history.record_price(ticker, state.current_tick(), price);
        }
    }
    Ok(())
}

async fn poll_tape(state: &DeskState, ticker: &str) -> Result<()> {
    if state.is_disabled(TAS) {
        return Ok(());
    }
    let cursor = state.tape_cursor(ticker);
    let result = state.client.tas(ticker, cursor).await;
    match optional(state, TAS, result) {
        Ok(Some(prints)) => {
            state.append_tape(ticker, prints);
        }
        Ok(None) => {}
        Err(e) => debug!(ticker, error = %e, "time and sales unavailable"),
    }
    Ok(())
}

// =============================================================================
// Slow cycle
// =============================================================================

pub async fn slow_cycle(state: Arc<DeskState>) -> Result<()> {
    let client = &state.client;

    let limit = state.config.read().news_limit;
    let news = client.news(state.news_cursor(), limit).await.context("news")?;
    let added = state.push_news(news);
    if added > 0 {
        debug!(added, "news received");
    }

    if !state.is_disabled(TENDERS) {
        let result = client.tenders().await.context("tenders");
        if let Some(tenders) = optional(&state, TENDERS, result)? {
            state.set_tenders(tenders);
        }
    }

    if !state.is_disabled(LEASES) {
        let result = client.leases().await.context("leases");
        if let Some(leases) = optional(&state, LEASES, result)? {
            state.set_leases(leases);
        }
    }

    let trader = client.trader().await.context("trader")?;
    state.set_trader(trader);

    if !state.is_disabled(LIMITS) {
        let result = client.limits().await.context("limits");
        if let Some(limits) = optional(&state, LIMITS, result)? {
            state.set_limits(limits);
        }
    }
    Ok(())
}
