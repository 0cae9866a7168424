use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use std::future::Future;
use tracing::{info, warn};

use crate::api::{auth::require_bus_token, state::AppState, websocket::websocket_handler};
use crate::error::{BridgeError, Result};
use crate::services::HealthStatus;

pub fn create_router(state: AppState) -> Router {
    if state.auth.is_open() {
        warn!("Bus bridge /ws is open to any client (server.auth_required = false)");
    } else if !state.auth.has_token() {
        warn!("server.auth_token is not set; /ws will refuse every client");
    }

    // Bus bridge for external clients; places orders, so it is token-gated
    let bus_bridge = Router::new()
        .route("/ws", get(websocket_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bus_token,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .merge(bus_bridge)
        .with_state(state)
}

/// Serve the router on `host:port` until `shutdown` resolves.
pub async fn serve<F>(router: Router, host: &str, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!("Starting HTTP server on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BridgeError::Internal(format!("HTTP server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}

/// Full health report
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health.get_health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Liveness probe
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe
async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.health.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match state.health.get_health().await.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}
