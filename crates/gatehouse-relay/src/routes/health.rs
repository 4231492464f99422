//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use gatehouse_core::Filter;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    events: u64,
}

/// Public health check endpoint for load balancer probes.
///
/// Counting events doubles as a storage liveness check.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let store = state.engine.store().clone();
    let events = tokio::task::spawn_blocking(move || store.count(&Filter::new())).await??;

    Ok(Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        events,
    }))
}
