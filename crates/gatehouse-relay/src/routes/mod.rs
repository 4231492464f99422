//! Route definitions for the relay.
//!
//! ## Routes
//!
//! - `/` (any method) - Websocket upgrade, capability document, or status page
//! - `GET /health` - Health check (JSON)

pub mod capability;
mod health;
pub mod status;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};

use tower_http::timeout::TimeoutLayer;

use crate::dispatch::{self, Route};
use crate::engine::session;
use crate::state::AppState;

/// Build the complete relay router.
///
/// Serve with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// root handler needs the peer address for lifecycle hooks.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", any(root))
        .route("/health", get(health::health_check))
        .with_state(state)
}

/// Answer `408 Request Timeout` when a request runs longer than `limit`.
pub fn timeout_layer(limit: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, limit)
}

async fn root(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match dispatch::route(&headers) {
        Route::StreamingHandoff => match upgrade {
            Ok(ws) => {
                let engine = Arc::clone(&state.engine);
                ws.on_upgrade(move |socket| session::run(socket, remote, engine))
            }
            Err(rejection) => {
                tracing::debug!(remote = %remote, error = %rejection, "websocket handshake rejected");
                rejection.into_response()
            }
        },
        Route::CapabilityDocument => capability::respond(&state),
        Route::StatusPage => status::page(&state, &headers).into_response(),
    }
}
