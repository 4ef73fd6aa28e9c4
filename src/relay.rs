// =============================================================================
// CORS Relay: pass-through forwarding for browsers
// =============================================================================
//
// Every request is forwarded verbatim (method, path, query, body) to one of
// three targets:
//   1. `X-Proxy-Base` when it is an http(s) URL,
//   2. the local Client API when `X-Proxy-Target: local`,
//   3. the remote DMA server otherwise.
//
// Responses come back with the upstream status, headers and body plus
// permissive CORS headers. OPTIONS is answered locally.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::credentials::Credentials;

pub const DEFAULT_REMOTE_TARGET: &str = "http://flserver.rotman.utoronto.ca:10001";
pub const DEFAULT_LOCAL_TARGET: &str = "http://localhost:9999";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";

const ALLOW_HEADERS: &str = "Authorization, Content-Type, X-API-Key, X-Proxy-Target, X-Proxy-Base";
const ALLOW_METHODS: &str = "GET, POST, DELETE, OPTIONS";

/// Upstream headers that are not copied to the caller.
const STRIPPED_HEADERS: &[&str] = &["transfer-encoding", "content-encoding", "connection", "content-length"];

const PROXY_TARGET: &str = "x-proxy-target";
const PROXY_BASE: &str = "x-proxy-base";
const API_KEY: &str = "x-api-key";

// =============================================================================
// Configuration
// =============================================================================

#[derive(Clone)]
pub struct RelayConfig {
    pub remote_target: String,
    pub local_target: String,
    /// `Authorization` added to non-local requests that carry none.
    pub auth_header: Option<String>,
    pub bind_addr: String,
}

impl RelayConfig {
    pub fn from_credentials(creds: &Credentials, bind_addr: Option<String>) -> Self {
        Self {
            remote_target: creds.direct_dma_url().unwrap_or(DEFAULT_REMOTE_TARGET).to_string(),
            local_target: creds.client_url().to_string(),
            auth_header: creds.authorization_value(),
            bind_addr: bind_addr.unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        }
    }
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("remote_target", &self.remote_target)
            .field("local_target", &self.local_target)
            .field("auth_header", &self.auth_header.as_ref().map(|_| "<redacted>"))
            .field("bind_addr", &self.bind_addr)
            .finish()
    }
}

/// Where one request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub base: String,
    /// `X-Proxy-Target: local` was given. Suppresses the built-in auth even
    /// when `X-Proxy-Base` overrides the URL.
    pub local: bool,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

pub fn select_target(headers: &HeaderMap, config: &RelayConfig) -> Target {
    let local = header_str(headers, PROXY_TARGET).is_some_and(|m| m.eq_ignore_ascii_case("local"));
    let base = match header_str(headers, PROXY_BASE) {
        Some(b) if b.starts_with("http://") || b.starts_with("https://") => b.to_string(),
        _ if local => config.local_target.clone(),
        _ => config.remote_target.clone(),
    };
    Target { base, local }
}

// =============================================================================
// Relay
// =============================================================================

pub struct Relay {
    config: RelayConfig,
    http: reqwest::Client,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build relay HTTP client")?;
        Ok(Self { config, http })
    }
}

pub fn router(relay: Arc<Relay>) -> Router {
    Router::new().fallback(forward).with_state(relay)
}

/// Bind and serve until Ctrl-C.
pub async fn run(config: RelayConfig) -> Result<()> {
    let bind_addr = config.bind_addr.clone();
    info!(
        remote = %config.remote_target,
        local = %config.local_target,
        builtin_auth = config.auth_header.is_some(),
        "relay targets"
    );
    let relay = Arc::new(Relay::new(config)?);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind relay on {bind_addr}"))?;
    info!(addr = %bind_addr, "relay listening");

    axum::serve(listener, router(relay))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            warn!("shutdown signal received, stopping relay");
        })
        .await
        .context("relay server error")
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
}

fn bad_gateway(message: String) -> Response {
    let mut resp = (StatusCode::BAD_GATEWAY, Json(json!({ "error": message }))).into_response();
    apply_cors(resp.headers_mut());
    resp
}

async fn forward(
    State(relay): State<Arc<Relay>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        let mut resp = StatusCode::OK.into_response();
        apply_cors(resp.headers_mut());
        return resp;
    }

    let target = select_target(&headers, &relay.config);
    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = format!("{}{}", target.base.trim_end_matches('/'), path);

    let mut req = relay
        .http
        .request(method.clone(), &url)
        .header(header::ACCEPT, "application/json");

    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        req = req.header(header::AUTHORIZATION, auth.clone());
    } else if let Some(auth) = relay.config.auth_header.as_deref().filter(|_| !target.local) {
        req = req.header(header::AUTHORIZATION, auth);
    }
    if let Some(key) = headers.get(API_KEY) {
        req = req.header(API_KEY, key.clone());
    }

    let carries_body = matches!(method, Method::POST | Method::PUT | Method::PATCH) && !body.is_empty();
    if carries_body {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));
        req = req.header(header::CONTENT_TYPE, content_type).body(body);
    }

    debug!(%method, %url, local = target.local, "relaying");
    let upstream = match req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(%method, %url, error = %e, "upstream unreachable");
            return bad_gateway(format!("upstream request to {url} failed: {e}"));
        }
    };

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let bytes = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => {
            warn!(%method, %url, error = %e, "failed to read upstream body");
            return bad_gateway(format!("failed to read upstream response from {url}: {e}"));
        }
    };

    let mut resp = Response::new(Body::from(bytes));
    *resp.status_mut() = status;
    let out = resp.headers_mut();
    for (name, value) in upstream_headers.iter() {
        if !STRIPPED_HEADERS.contains(&name.as_str()) {
            out.append(HeaderName::clone(name), value.clone());
        }
    }
    apply_cors(out);
    resp
}
