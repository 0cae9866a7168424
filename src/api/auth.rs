use axum::extract::{Request, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::api::state::AppState;
use crate::config::ServerConfig;

pub const BUS_TOKEN_HEADER: &str = "x-kite-bridge-token";

pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn extract_bearer_token(raw: &str) -> Option<&str> {
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
}

/// Access rule for the bus bridge. Only the token's fingerprint is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusAuth {
    fingerprint: Option<String>,
    required: bool,
}

impl BusAuth {
    pub fn new(token: Option<&str>, required: bool) -> Self {
        Self {
            fingerprint: token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(token_fingerprint),
            required,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.auth_token.as_deref(), config.auth_required)
    }

    pub fn has_token(&self) -> bool {
        self.fingerprint.is_some()
    }

    /// Open access: no token configured and none required.
    pub fn is_open(&self) -> bool {
        self.fingerprint.is_none() && !self.required
    }

    pub fn authorize(&self, headers: &HeaderMap) -> std::result::Result<(), (StatusCode, String)> {
        if self.is_open() {
            return Ok(());
        }
        let Some(expected) = self.fingerprint.as_deref() else {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "bus bridge auth is required but server.auth_token is not configured".to_string(),
            ));
        };

        let provided = headers
            .get(BUS_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .or_else(|| {
                headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(extract_bearer_token)
            });

        if provided.is_some_and(|token| token_fingerprint(token) == expected) {
            return Ok(());
        }

        Err((
            StatusCode::UNAUTHORIZED,
            "bus bridge auth failed (missing/invalid token)".to_string(),
        ))
    }
}

/// Route layer guarding `/ws`; runs before the upgrade is negotiated.
pub async fn require_bus_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match state.auth.authorize(request.headers()) {
        Ok(()) => next.run(request).await,
        Err((status, message)) => {
            warn!("Rejected bus bridge client: {}", message);
            (status, message).into_response()
        }
    }
}
