// =============================================================================
// REST API Endpoints: Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Reads are public; order entry and
// cancellation go through the `AdminToken` extractor.
//
// CORS is permissive: the dashboard is usually opened from a different
// origin than this service.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AdminToken;
use crate::app_state::DeskState;
use crate::market_data::BookSummary;
use crate::rit::StatusError;
use crate::types::{OrderBook, OrderRequest};

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<DeskState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/securities", get(securities))
        .route("/api/v1/book/:ticker", get(book))
        .route("/api/v1/ladder/:ticker", get(ladder))
        .route("/api/v1/history/:ticker", get(history))
        .route("/api/v1/indicators/:ticker", get(indicators))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/news", get(news))
        .route("/api/v1/orders", get(orders).post(submit_order))
        .route("/api/v1/orders/:id", delete(cancel_order))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn unknown_ticker(ticker: &str) -> Response {
    api_error(StatusCode::NOT_FOUND, format!("unknown ticker {ticker}"))
}

/// Map a failed RIT call onto a dashboard response: RIT's own 4xx answers
/// keep their status, everything else is a bad gateway.
fn upstream_error(err: anyhow::Error) -> Response {
    let status = StatusError::status_of(&err)
        .filter(|s| (400..500).contains(s))
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    api_error(status, format!("{err:#}"))
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connected: bool,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<DeskState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        connected: state.connection.read().connected,
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Reads
// =============================================================================

async fn full_state(State(state): State<Arc<DeskState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

async fn securities(State(state): State<Arc<DeskState>>) -> impl IntoResponse {
    Json(state.securities.read().clone())
}

#[derive(Serialize)]
struct BookResponse {
    ticker: String,
    summary: BookSummary,
    book: OrderBook,
}

async fn book(State(state): State<Arc<DeskState>>, Path(ticker): Path<String>) -> Response {
    let ticker = ticker.to_uppercase();
    match (state.books.book(&ticker), state.books.summary(&ticker)) {
        (Some(book), Some(summary)) => Json(BookResponse { ticker, summary, book }).into_response(),
        _ => unknown_ticker(&ticker),
    }
}

async fn ladder(State(state): State<Arc<DeskState>>, Path(ticker): Path<String>) -> Response {
    let ticker = ticker.to_uppercase();
    match state.ladder(&ticker) {
        Some(rows) => Json(json!({ "ticker": ticker, "rows": rows })).into_response(),
        None => unknown_ticker(&ticker),
    }
}

async fn history(State(state): State<Arc<DeskState>>, Path(ticker): Path<String>) -> Response {
    let ticker = ticker.to_uppercase();
    let bars = state.history.bars(&ticker);
    if bars.is_empty() && !state.ticker_known(&ticker) {
        return unknown_ticker(&ticker);
    }
    let closes = state.history.closes(&ticker);
    Json(json!({ "ticker": ticker, "bars": bars, "closes": closes })).into_response()
}

async fn indicators(State(state): State<Arc<DeskState>>, Path(ticker): Path<String>) -> Response {
    let ticker = ticker.to_uppercase();
    match state.indicator_snapshot(&ticker) {
        Some(snapshot) => Json(json!({ "ticker": ticker, "indicators": snapshot })).into_response(),
        None if state.ticker_known(&ticker) => {
            api_error(StatusCode::NOT_FOUND, format!("no indicators for {ticker} yet"))
        }
        None => unknown_ticker(&ticker),
    }
}

async fn positions(State(state): State<Arc<DeskState>>) -> impl IntoResponse {
    let ledger = state.ledger.read();
    Json(json!({
        "positions": ledger.book.positions(),
        "pnl": ledger.book.totals(),
        "drift": state.drift.read().clone(),
    }))
}

async fn news(State(state): State<Arc<DeskState>>) -> impl IntoResponse {
    let items: Vec<_> = state.news.read().iter().cloned().collect();
    Json(items)
}

async fn orders(State(state): State<Arc<DeskState>>) -> impl IntoResponse {
    Json(state.orders.read().clone())
}

// =============================================================================
// Order entry (admin token)
// =============================================================================

async fn submit_order(
    _auth: AdminToken,
    State(state): State<Arc<DeskState>>,
    Json(req): Json<OrderRequest>,
) -> Response {
    if let Err(e) = req.validate() {
        return api_error(StatusCode::BAD_REQUEST, e.to_string());
    }
    info!(ticker = %req.ticker, action = %req.action, qty = req.quantity, "order submitted via API");
    match state.client.submit_order(&req).await {
        Ok(order) => {
            state.increment_version();
            Json(order).into_response()
        }
        Err(e) => {
            warn!(error = %e, "order submission failed");
            state.push_error(Some("submit_order"), format!("{e:#}"));
            upstream_error(e)
        }
    }
}

async fn cancel_order(
    _auth: AdminToken,
    State(state): State<Arc<DeskState>>,
    Path(order_id): Path<u64>,
) -> Response {
    info!(order_id, "order cancel via API");
    match state.client.cancel_order(order_id).await {
        Ok(()) => Json(json!({ "cancelled": order_id })).into_response(),
        Err(e) => {
            warn!(order_id, error = %e, "order cancel failed");
            state.push_error(Some("cancel_order"), format!("{e:#}"));
            upstream_error(e)
        }
    }
}
