// =============================================================================
// Admin Token Authentication
// =============================================================================
//
// Order entry and cancellation through the dashboard API require
// `Authorization: Bearer <token>` matching the token held by `DeskState`
// (loaded from `RIT_DESK_ADMIN_TOKEN` at startup). The WebSocket feed takes
// the same token as `?token=`. Without a token every protected call is
// refused.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app_state::DeskState;

pub const ADMIN_TOKEN_ENV: &str = "RIT_DESK_ADMIN_TOKEN";

/// Byte-wise comparison whose duration does not depend on where the inputs
/// differ. Lengths are compared up front.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Admin token from the environment, blank treated as unset.
pub fn admin_token_from_env() -> Option<String> {
    std::env::var(ADMIN_TOKEN_ENV)
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Check `presented` against `expected`; no expected token never matches.
pub fn validate_token(expected: Option<&str>, presented: &str) -> bool {
    match expected {
        Some(expected) => constant_time_eq(presented.as_bytes(), expected.as_bytes()),
        None => false,
    }
}

/// Extractor guarding order-entry routes.
pub struct AdminToken;

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.status, axum::Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<DeskState>> for AdminToken {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<DeskState>) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token() else {
            warn!(env = ADMIN_TOKEN_ENV, "admin token not configured, refusing protected call");
            return Err(AuthRejection {
                status: StatusCode::FORBIDDEN,
                message: "order entry is disabled: admin token not configured",
            });
        };

        let presented = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        match presented {
            Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(AdminToken),
            Some(_) => {
                warn!("invalid admin token presented");
                Err(AuthRejection {
                    status: StatusCode::FORBIDDEN,
                    message: "invalid authorization token",
                })
            }
            None => Err(AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                message: "missing bearer token",
            }),
        }
    }
}
