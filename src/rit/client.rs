// =============================================================================
// RIT REST API Client
// =============================================================================
//
// Auth headers (Basic for DMA, X-API-Key for the local Client API) are baked
// into the reqwest client once, so individual calls never touch secrets.
//
// `request` never turns an HTTP status into an error: tools such as `watch`
// and the relay need to see a 429 or 404 as data. The typed calls on top of
// it do convert non-2xx responses into `StatusError`, which callers may
// downcast to inspect the status.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::stats::RequestStats;
use crate::credentials::{build_url, AuthHeaders, ConnectionMode};
use crate::types::{
    Bar, CaseInfo, NewsItem, Order, OrderBook, OrderRequest, OrderStatus, Security, TimeAndSale,
    Trader, TradingLimit,
};

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Extra attempts after a 429 in the typed calls.
pub const DEFAULT_RETRIES: u32 = 2;
/// Wait used when a 429 carries no usable hint (seconds).
pub const DEFAULT_RETRY_AFTER: f64 = 0.5;
/// Longest server wait hint honoured before retrying.
pub const MAX_RETRY_WAIT: Duration = Duration::from_secs(30);

/// Raw outcome of one RIT call.
#[derive(Debug, Clone)]
pub struct RitResponse {
    pub status: u16,
    /// Decoded JSON body, or `{"raw": <text>}` when the body is not JSON.
    pub payload: Value,
    /// Server wait hint in seconds (`wait` field or `Retry-After` header).
    pub retry_after: Option<f64>,
}

impl RitResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// The payload on 2xx, otherwise a `StatusError`.
    pub fn into_payload(self, method: &Method, path: &str) -> Result<Value> {
        if self.is_success() {
            Ok(self.payload)
        } else {
            Err(StatusError {
                method: method.to_string(),
                path: path.to_string(),
                status: self.status,
                body: self.payload,
            }
            .into())
        }
    }
}

/// A typed call got a non-2xx response.
#[derive(Debug, Clone)]
pub struct StatusError {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub body: Value,
}

impl StatusError {
    /// Status of `err` when it is (or wraps) a `StatusError`.
    pub fn status_of(err: &anyhow::Error) -> Option<u16> {
        err.downcast_ref::<StatusError>().map(|e| e.status)
    }
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.status == 401 {
            write!(f, "{} {}: unauthorized, check credentials", self.method, self.path)
        } else {
            write!(f, "{} {} returned {}: {}", self.method, self.path, self.status, self.body)
        }
    }
}

impl std::error::Error for StatusError {}

/// Retry-after hint from a response: the payload's `wait` field, else the
/// `Retry-After` header, as float seconds clamped at 0.
pub(crate) fn parse_retry_after(payload: &Value, headers: &HeaderMap) -> Option<f64> {
    let from_payload = payload.get("wait").and_then(|w| match w {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    });
    let from_header = || {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok())
    };

    from_payload
        .or_else(from_header)
        .filter(|w| w.is_finite())
        .map(|w| w.max(0.0))
}

/// Like `parse_retry_after` but falls back to `fallback` seconds.
pub fn extract_retry_after(payload: &Value, headers: &HeaderMap, fallback: f64) -> f64 {
    parse_retry_after(payload, headers).unwrap_or(fallback)
}

/// Sleep length for a wait hint in seconds, capped at `cap`. Hints too large
/// for a `Duration` get the cap.
pub fn capped_wait(secs: f64, cap: Duration) -> Duration {
    if secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).map_or(cap, |d| d.min(cap))
}

/// Decode a response body: JSON when possible, `{"raw": text}` otherwise.
pub(crate) fn decode_body(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text }))
}

/// RIT REST client bound to one base URL and connection mode.
#[derive(Clone)]
pub struct RitClient {
    base_url: String,
    mode: ConnectionMode,
    http: reqwest::Client,
    stats: Arc<RequestStats>,
    max_retry_wait: Duration,
}

impl RitClient {
    pub fn new(base_url: impl Into<String>, mode: ConnectionMode, headers: &AuthHeaders) -> Result<Self> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .default_headers(headers.to_header_map()?)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, mode = %mode, "RitClient initialised");

        Ok(Self {
            base_url,
            mode,
            http,
            stats: Arc::new(RequestStats::new()),
            max_retry_wait: MAX_RETRY_WAIT,
        })
    }

    /// Override the cap on 429 wait hints.
    pub fn with_max_retry_wait(mut self, cap: Duration) -> Self {
        self.max_retry_wait = cap;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn stats(&self) -> &Arc<RequestStats> {
        &self.stats
    }

    // -------------------------------------------------------------------------
    // Raw requests
    // -------------------------------------------------------------------------

    /// Send one request. HTTP error statuses come back as data; only
    /// transport failures are errors.
    pub async fn request<K, V>(&self, method: Method, path: &str, params: &[(K, V)]) -> Result<RitResponse>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let url = build_url(&self.base_url, path, params);
        let resp = match self.http.request(method.clone(), &url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.stats.record_transport_error();
                return Err(e).with_context(|| format!("{method} {path} request failed"));
            }
        };

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let text = match resp.text().await {
            Ok(text) => text,
            Err(e) => {
                self.stats.record_transport_error();
                return Err(e).with_context(|| format!("failed to read {method} {path} body"));
            }
        };

        let payload = decode_body(&text);
        let retry_after = parse_retry_after(&payload, &headers);
        self.stats.record_status(status, retry_after);

        debug!(%method, path, status, "RIT response");
        Ok(RitResponse {
            status,
            payload,
            retry_after,
        })
    }

    /// `request`, sleeping out up to `retries` 429s. The last response is
    /// returned whatever its status.
    pub async fn request_with_retry<K, V>(
        &self,
        method: Method,
        path: &str,
        params: &[(K, V)],
        retries: u32,
    ) -> Result<RitResponse>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut attempt = 0;
        loop {
            let resp = self.request(method.clone(), path, params).await?;
            if !resp.is_rate_limited() || attempt >= retries {
                return Ok(resp);
            }
            let hint = resp.retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
            let wait = capped_wait(hint, self.max_retry_wait);
            warn!(path, attempt, hint, wait_ms = wait.as_millis() as u64, "429 from RIT, backing off");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, path: &str, params: &[(&str, String)]) -> Result<T> {
        let resp = self.request_with_retry(method.clone(), path, params, DEFAULT_RETRIES).await?;
        let payload = resp.into_payload(&method, path)?;
        serde_json::from_value(payload).with_context(|| format!("failed to decode {method} {path} response"))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        self.call(Method::GET, path, params).await
    }

    // -------------------------------------------------------------------------
    // Market data
    // -------------------------------------------------------------------------

    /// GET /v1/case
    #[instrument(skip(self), name = "rit::case")]
    pub async fn case(&self) -> Result<CaseInfo> {
        self.get("/v1/case", &[]).await
    }

    /// GET /v1/securities
    #[instrument(skip(self), name = "rit::securities")]
    pub async fn securities(&self) -> Result<Vec<Security>> {
        self.get("/v1/securities", &[]).await
    }

    /// GET /v1/securities/book
    #[instrument(skip(self), name = "rit::book")]
    pub async fn book(&self, ticker: &str, limit: u32) -> Result<OrderBook> {
        self.get(
            "/v1/securities/book",
            &[("ticker", ticker.to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    /// GET /v1/securities/history, oldest bar first.
    #[instrument(skip(self), name = "rit::history")]
    pub async fn history(&self, ticker: &str, limit: Option<u32>) -> Result<Vec<Bar>> {
        let mut params = vec![("ticker", ticker.to_string())];
        if let Some(limit) = limit {
            params.push(("limit", limit.to_string()));
        }
        let mut bars: Vec<Bar> = self.get("/v1/securities/history", &params).await?;
        // The server lists the newest tick first.
        bars.sort_by_key(|b| b.tick);
        Ok(bars)
    }

    /// GET /v1/securities/tas
    #[instrument(skip(self), name = "rit::tas")]
    pub async fn tas(&self, ticker: &str, after: Option<u64>) -> Result<Vec<TimeAndSale>> {
        let mut params = vec![("ticker", ticker.to_string())];
        if let Some(after) = after {
            params.push(("after", after.to_string()));
        }
        self.get("/v1/securities/tas", &params).await
    }

    /// GET /v1/news. The cursor is sent as `after` over DMA and `since` to
    /// the Client API.
    #[instrument(skip(self), name = "rit::news")]
    pub async fn news(&self, cursor: Option<u64>, limit: u32) -> Result<Vec<NewsItem>> {
        let mut params = vec![("limit", limit.to_string())];
        if let Some(id) = cursor {
            params.push((self.news_cursor_param(), id.to_string()));
        }
        self.get("/v1/news", &params).await
    }

    pub fn news_cursor_param(&self) -> &'static str {
        match self.mode {
            ConnectionMode::Dma => "after",
            ConnectionMode::Client => "since",
        }
    }

    /// GET /v1/tenders
    #[instrument(skip(self), name = "rit::tenders")]
    pub async fn tenders(&self) -> Result<Vec<Value>> {
        self.get("/v1/tenders", &[]).await
    }

    /// GET /v1/leases
    #[instrument(skip(self), name = "rit::leases")]
    pub async fn leases(&self) -> Result<Vec<Value>> {
        self.get("/v1/leases", &[]).await
    }

    // -------------------------------------------------------------------------
    // Account
    // -------------------------------------------------------------------------

    /// GET /v1/trader
    #[instrument(skip(self), name = "rit::trader")]
    pub async fn trader(&self) -> Result<Trader> {
        self.get("/v1/trader", &[]).await
    }

    /// GET /v1/limits
    #[instrument(skip(self), name = "rit::limits")]
    pub async fn limits(&self) -> Result<Vec<TradingLimit>> {
        self.get("/v1/limits", &[]).await
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// GET /v1/orders, optionally filtered by status.
    #[instrument(skip(self), name = "rit::orders")]
    pub async fn orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let params: Vec<(&str, String)> = status.map(|s| ("status", s.to_string())).into_iter().collect();
        self.get("/v1/orders", &params).await
    }

    /// POST /v1/orders. RIT takes the order as query parameters.
    #[instrument(skip(self, req), fields(ticker = %req.ticker, action = %req.action), name = "rit::submit_order")]
    pub async fn submit_order(&self, req: &OrderRequest) -> Result<Order> {
        req.validate()?;
        let params = req.to_params();
        let resp = self.request(Method::POST, "/v1/orders", &params).await?;
        let payload = resp.into_payload(&Method::POST, "/v1/orders")?;
        let order: Order = serde_json::from_value(payload).context("failed to decode submitted order")?;
        debug!(order_id = order.order_id, "order accepted");
        Ok(order)
    }

    /// DELETE /v1/orders/{id}
    #[instrument(skip(self), name = "rit::cancel_order")]
    pub async fn cancel_order(&self, order_id: u64) -> Result<()> {
        let path = format!("/v1/orders/{order_id}");
        let none: [(&str, &str); 0] = [];
        let resp = self.request(Method::DELETE, &path, &none).await?;
        resp.into_payload(&Method::DELETE, &path)?;
        Ok(())
    }
}

impl std::fmt::Debug for RitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RitClient")
            .field("base_url", &self.base_url)
            .field("mode", &self.mode)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{delete, get};
    use axum::{Json, Router};
    use reqwest::header::HeaderValue;

    use super::*;
    use crate::rit::test_support::serve;
    use crate::types::{OrderType, Side};

    fn client(base: &str, mode: ConnectionMode) -> RitClient {
        let headers = AuthHeaders {
            authorization: None,
            api_key: Some("KEY123".into()),
        };
        RitClient::new(base, mode, &headers).unwrap()
    }

    #[test]
    fn retry_after_prefers_payload_wait() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(extract_retry_after(&json!({"wait": 0.25}), &headers, 9.0), 0.25);
        assert_eq!(extract_retry_after(&json!({"wait": "1.5"}), &headers, 9.0), 1.5);
        assert_eq!(extract_retry_after(&json!({}), &headers, 9.0), 3.0);
        assert_eq!(extract_retry_after(&json!({"wait": -2}), &HeaderMap::new(), 9.0), 0.0);
        assert_eq!(extract_retry_after(&json!({"wait": "soon"}), &HeaderMap::new(), 9.0), 9.0);
    }

    #[test]
    fn wait_hints_are_capped() {
        let cap = Duration::from_secs(30);
        assert_eq!(capped_wait(0.25, cap), Duration::from_millis(250));
        assert_eq!(capped_wait(0.0, cap), Duration::ZERO);
        assert_eq!(capped_wait(-1.0, cap), Duration::ZERO);
        assert_eq!(capped_wait(120.0, cap), cap);
        assert_eq!(capped_wait(1e20, cap), cap);
        assert_eq!(capped_wait(f64::INFINITY, cap), cap);
    }

    #[test]
    fn non_json_body_is_wrapped() {
        assert_eq!(decode_body("<html>"), json!({"raw": "<html>"}));
        assert_eq!(decode_body("[1,2]"), json!([1, 2]));
    }

    #[test]
    fn unauthorized_message() {
        let err: anyhow::Error = StatusError {
            method: "GET".into(),
            path: "/v1/case".into(),
            status: 401,
            body: json!({}),
        }
        .into();
        assert!(err.to_string().contains("unauthorized, check credentials"));
        assert_eq!(StatusError::status_of(&err), Some(401));
    }

    #[tokio::test]
    async fn typed_case_and_api_key_header() {
        let app = Router::new().route(
            "/v1/case",
            get(|headers: axum::http::HeaderMap| async move {
                let key = headers.get("x-api-key").and_then(|v| v.to_str().ok()).unwrap_or("");
                if key == "KEY123" {
                    Json(json!({"name": "Demo", "period": 1, "tick": 42, "status": "ACTIVE"})).into_response()
                } else {
                    StatusCode::UNAUTHORIZED.into_response()
                }
            }),
        );
        let base = serve(app).await;
        let case = client(&base, ConnectionMode::Client).case().await.unwrap();
        assert_eq!(case.name, "Demo");
        assert_eq!(case.tick, 42);
    }

    #[tokio::test]
    async fn raw_request_returns_error_status_as_data() {
        let app = Router::new().route("/v1/tenders", get(|| async { (StatusCode::NOT_FOUND, "nope") }));
        let base = serve(app).await;
        let c = client(&base, ConnectionMode::Dma);

        let none: [(&str, &str); 0] = [];
        let resp = c.request(Method::GET, "/v1/tenders", &none).await.unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.payload, json!({"raw": "nope"}));

        let err = c.tenders().await.unwrap_err();
        assert_eq!(StatusError::status_of(&err), Some(404));
        assert_eq!(c.stats().snapshot().errors, 2);
    }

    #[tokio::test]
    async fn retries_after_rate_limit() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/v1/securities",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::TOO_MANY_REQUESTS, Json(json!({"wait": 0.01}))).into_response()
                    } else {
                        Json(json!([{"ticker": "CRZY", "position": 100, "last": 10.5}])).into_response()
                    }
                }),
            )
            .with_state(hits.clone());
        let base = serve(app).await;
        let c = client(&base, ConnectionMode::Client);

        let secs = c.securities().await.unwrap();
        assert_eq!(secs[0].ticker, "CRZY");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        let snap = c.stats().snapshot();
        assert_eq!(snap.rate_limited, 1);
        assert_eq!(snap.last_retry_after, Some(0.01));
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let app = Router::new().route(
            "/v1/case",
            get(|| async { (StatusCode::TOO_MANY_REQUESTS, Json(json!({"wait": 0}))) }),
        );
        let base = serve(app).await;
        let c = client(&base, ConnectionMode::Client);
        let none: [(&str, &str); 0] = [];
        let resp = c.request_with_retry(Method::GET, "/v1/case", &none, 2).await.unwrap();
        assert_eq!(resp.status, 429);
        assert_eq!(c.stats().snapshot().rate_limited, 3);
    }

    #[tokio::test]
    async fn huge_wait_hint_is_capped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/v1/case",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::TOO_MANY_REQUESTS, Json(json!({"wait": 1e20}))).into_response()
                    } else {
                        Json(json!({"name": "Demo", "tick": 7})).into_response()
                    }
                }),
            )
            .with_state(hits.clone());
        let base = serve(app).await;
        let c = client(&base, ConnectionMode::Client).with_max_retry_wait(Duration::from_millis(20));

        let case = c.case().await.unwrap();
        assert_eq!(case.tick, 7);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(c.stats().snapshot().rate_limited, 1);
    }

    #[tokio::test]
    async fn news_cursor_depends_on_mode() {
        let app = Router::new().route(
            "/v1/news",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let cursor = q.get("after").map(|v| format!("after={v}"))
                    .or_else(|| q.get("since").map(|v| format!("since={v}")))
                    .unwrap_or_default();
                Json(json!([{"news_id": 8, "headline": cursor, "body": ""}]))
            }),
        );
        let base = serve(app).await;

        let dma = client(&base, ConnectionMode::Dma).news(Some(7), 20).await.unwrap();
        assert_eq!(dma[0].headline, "after=7");
        let local = client(&base, ConnectionMode::Client).news(Some(7), 20).await.unwrap();
        assert_eq!(local[0].headline, "since=7");
    }

    #[tokio::test]
    async fn history_is_sorted_oldest_first() {
        let app = Router::new().route(
            "/v1/securities/history",
            get(|| async {
                Json(json!([
                    {"tick": 3, "open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0},
                    {"tick": 1, "open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0}
                ]))
            }),
        );
        let base = serve(app).await;
        let bars = client(&base, ConnectionMode::Client).history("CRZY", None).await.unwrap();
        assert_eq!(bars.iter().map(|b| b.tick).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[tokio::test]
    async fn submit_sends_query_params_and_cancel_deletes() {
        let app = Router::new()
            .route(
                "/v1/orders",
                axum::routing::post(|Query(q): Query<HashMap<String, String>>| async move {
                    Json(json!({
                        "order_id": 55, "ticker": q["ticker"], "type": q["type"],
                        "quantity": q["quantity"].parse::<f64>().unwrap(),
                        "action": q["action"], "price": q["price"].parse::<f64>().unwrap(),
                        "quantity_filled": 0, "status": "OPEN"
                    }))
                }),
            )
            .route("/v1/orders/:id", delete(|| async { Json(json!({"success": true})) }));
        let base = serve(app).await;
        let c = client(&base, ConnectionMode::Client);

        let req = OrderRequest {
            ticker: "CRZY".into(),
            kind: OrderType::Limit,
            quantity: 100.0,
            action: Side::Sell,
            price: Some(10.25),
        };
        let order = c.submit_order(&req).await.unwrap();
        assert_eq!(order.order_id, 55);
        assert_eq!(order.action, Side::Sell);
        assert_eq!(order.price, Some(10.25));

        c.cancel_order(55).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_order_never_reaches_the_server() {
        let c = client("http://127.0.0.1:9", ConnectionMode::Client);
        let req = OrderRequest {
            ticker: "CRZY".into(),
            kind: OrderType::Limit,
            quantity: 100.0,
            action: Side::Buy,
            price: None,
        };
        assert!(c.submit_order(&req).await.is_err());
        assert_eq!(c.stats().snapshot().requests, 0);
    }
}
