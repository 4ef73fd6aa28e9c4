// =============================================================================
// Credentials & Endpoint Resolution
// =============================================================================
//
// Every tool reads the same `creds/rit_rest.json`. From it we derive:
//   - the connection mode (local Client REST API vs. DMA to the server),
//   - the base URL for that mode,
//   - the auth headers (X-API-Key for Client, HTTP Basic for DMA).
//
// SECURITY: passwords, API keys and pre-built authorization headers are never
// logged or printed through `Debug`.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_CREDS_PATH: &str = "creds/rit_rest.json";
pub const DEFAULT_DMA_HOST: &str = "flserver.rotman.utoronto.ca";
pub const DEFAULT_CLIENT_BASE_URL: &str = "http://localhost:9999";
pub const DEFAULT_CASE: &str = "Volatility Trading Case";

/// Case name, case port, DMA port (if the case offers DMA).
pub const CASE_PORTS: &[(&str, u16, Option<u16>)] = &[
    ("Liquidity Risk Case", 16500, Some(16510)),
    ("Volatility Trading Case", 16520, Some(16530)),
    ("Merger Arbitrage Case", 16540, Some(16550)),
    ("GBE Energy Electricity Trading Case", 16555, None),
    ("Algorithmic Market Making Case (server 1)", 16560, Some(16565)),
    ("Algorithmic Market Making Case (server 2)", 16570, Some(16575)),
    ("Algorithmic Market Making Case (server 3)", 16580, Some(16585)),
];

/// Look up the DMA port of a known case.
pub fn case_dma_port(case_name: &str) -> Option<u16> {
    CASE_PORTS
        .iter()
        .find(|(name, _, _)| *name == case_name)
        .and_then(|(_, _, dma)| *dma)
}

/// Path of the credentials file: explicit argument, then `RIT_CREDS_PATH`,
/// then the default.
pub fn creds_path(explicit: Option<&str>) -> PathBuf {
    if let Some(p) = explicit {
        return PathBuf::from(p);
    }
    std::env::var("RIT_CREDS_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CREDS_PATH))
}

// =============================================================================
// Connection mode
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Local RIT client app REST API.
    Client,
    /// Direct market access to the simulation server.
    Dma,
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Dma => write!(f, "dma"),
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub authorization_header: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub dma_base_url: Option<String>,
    #[serde(default)]
    pub dma_host: Option<String>,
    #[serde(default)]
    pub server_host: Option<String>,
    #[serde(default)]
    pub dma_port: Option<u16>,
    #[serde(default)]
    pub client_base_url: Option<String>,
    #[serde(default)]
    pub case_name: Option<String>,
}

/// Treat `""` the same as a missing field.
fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Credentials {
    /// Load credentials, failing when the file is missing or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("missing creds file: {}", path.display());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read creds from {}", path.display()))?;
        let creds: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse creds from {}", path.display()))?;
        info!(path = %path.display(), "credentials loaded");
        Ok(creds)
    }

    /// Load credentials, returning empty ones when the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no creds file, continuing without credentials");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }

    /// `Authorization` value: the pre-built header when present, otherwise
    /// HTTP Basic from username + password.
    pub fn authorization_value(&self) -> Option<String> {
        if let Some(h) = non_empty(&self.authorization_header) {
            return Some(h.to_string());
        }
        self.basic_auth()
    }

    /// HTTP Basic value built strictly from username + password.
    pub fn basic_auth(&self) -> Option<String> {
        match (non_empty(&self.username), non_empty(&self.password)) {
            (Some(u), Some(p)) => Some(basic_auth_value(u, p)),
            _ => None,
        }
    }

    /// DMA base URL configured directly (`dma_base_url`, then `base_url`).
    pub fn direct_dma_url(&self) -> Option<&str> {
        non_empty(&self.dma_base_url).or_else(|| non_empty(&self.base_url))
    }

    pub fn client_url(&self) -> &str {
        non_empty(&self.client_base_url).unwrap_or(DEFAULT_CLIENT_BASE_URL)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("authorization_header", &redact(&self.authorization_header))
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("dma_base_url", &self.dma_base_url)
            .field("dma_host", &self.dma_host)
            .field("server_host", &self.server_host)
            .field("dma_port", &self.dma_port)
            .field("client_base_url", &self.client_base_url)
            .field("case_name", &self.case_name)
            .finish()
    }
}

pub fn basic_auth_value(username: &str, password: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {token}")
}

/// Pick the connection mode: explicit override, otherwise Client when only an
/// API key is configured, otherwise DMA.
pub fn resolve_mode(creds: &Credentials, override_mode: Option<ConnectionMode>) -> ConnectionMode {
    if let Some(mode) = override_mode {
        return mode;
    }
    let has_user_auth =
        non_empty(&creds.username).is_some() || non_empty(&creds.authorization_header).is_some();
    if creds.api_key().is_some() && !has_user_auth {
        ConnectionMode::Client
    } else {
        ConnectionMode::Dma
    }
}

// =============================================================================
// URL helpers
// =============================================================================

/// Strip a trailing slash and a trailing `/v1` so paths can always be given
/// as `/v1/...`.
pub fn normalize_base_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    base.strip_suffix("/v1").unwrap_or(base).to_string()
}

/// Join `base` and `path` with exactly one slash and append form-encoded
/// query parameters (space as `+`) in the given order.
pub fn build_url<K, V>(base_url: &str, path: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    let mut url = if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    };
    if !params.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())))
            .finish();
        url.push('?');
        url.push_str(&query);
    }
    url
}

/// Resolve the DMA base URL from explicit arguments and credentials.
///
/// Order: `dma_base_url`; then `host:port` where the port comes from the
/// argument or `dma_port`; then the DMA port of the selected case.
pub fn resolve_dma_base_url(
    creds: &Credentials,
    case_name: Option<&str>,
    dma_port: Option<u16>,
    host: Option<&str>,
) -> Option<String> {
    if let Some(url) = non_empty(&creds.dma_base_url) {
        return Some(url.to_string());
    }

    let resolved_host = host
        .or_else(|| non_empty(&creds.dma_host))
        .or_else(|| non_empty(&creds.server_host))
        .unwrap_or(DEFAULT_DMA_HOST);

    if let Some(port) = dma_port.or(creds.dma_port) {
        return Some(format!("http://{resolved_host}:{port}"));
    }

    let selected_case = case_name
        .or_else(|| non_empty(&creds.case_name))
        .unwrap_or(DEFAULT_CASE);
    case_dma_port(selected_case).map(|port| format!("http://{resolved_host}:{port}"))
}

/// Resolve the base URL for `mode`, normalised.
pub fn resolve_base_url(
    creds: &Credentials,
    mode: ConnectionMode,
    override_url: Option<&str>,
) -> Result<String> {
    if let Some(url) = override_url.filter(|u| !u.trim().is_empty()) {
        return Ok(normalize_base_url(url));
    }
    match mode {
        ConnectionMode::Client => Ok(normalize_base_url(creds.client_url())),
        ConnectionMode::Dma => {
            if let Some(url) = creds.direct_dma_url() {
                return Ok(normalize_base_url(url));
            }
            let host = non_empty(&creds.dma_host).or_else(|| non_empty(&creds.server_host));
            match (host, creds.dma_port) {
                (Some(h), Some(p)) => Ok(normalize_base_url(&format!("http://{h}:{p}"))),
                _ => bail!("missing base URL configuration in creds"),
            }
        }
    }
}

// =============================================================================
// Auth headers
// =============================================================================

/// Header set attached to every RIT request.
#[derive(Clone, Default)]
pub struct AuthHeaders {
    pub authorization: Option<String>,
    pub api_key: Option<String>,
}

impl AuthHeaders {
    /// Strict headers for `mode`: Client requires an API key, DMA requires an
    /// authorization header or username + password.
    pub fn for_mode(creds: &Credentials, mode: ConnectionMode) -> Result<Self> {
        match mode {
            ConnectionMode::Client => {
                let key = creds
                    .api_key()
                    .context("missing api_key for client REST API")?;
                Ok(Self {
                    authorization: None,
                    api_key: Some(key.to_string()),
                })
            }
            ConnectionMode::Dma => {
                let auth = creds
                    .authorization_value()
                    .context("missing username/password for DMA REST API")?;
                Ok(Self {
                    authorization: Some(auth),
                    api_key: None,
                })
            }
        }
    }

    /// Best-effort headers: Basic auth when username + password exist, the
    /// API key only when asked for and present.
    pub fn lenient(creds: &Credentials, use_api_key: bool) -> Self {
        Self {
            authorization: creds.basic_auth(),
            api_key: if use_api_key {
                creds.api_key().map(str::to_string)
            } else {
                None
            },
        }
    }

    /// Materialise as a reqwest header map (always includes `Accept`).
    pub fn to_header_map(&self) -> Result<reqwest::header::HeaderMap> {
        use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};

        let mut map = HeaderMap::new();
        map.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(auth) = &self.authorization {
            let mut val = HeaderValue::from_str(auth).context("authorization header is not valid ASCII")?;
            val.set_sensitive(true);
            map.insert(AUTHORIZATION, val);
        }
        if let Some(key) = &self.api_key {
            let mut val = HeaderValue::from_str(key).context("api key is not a valid header value")?;
            val.set_sensitive(true);
            map.insert("X-API-Key", val);
        }
        Ok(map)
    }
}

impl std::fmt::Debug for AuthHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthHeaders")
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
