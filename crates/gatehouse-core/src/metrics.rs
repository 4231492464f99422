//! Prometheus metrics helpers for the relay.
//!
//! # Usage
//!
//! ```rust,ignore
//! use gatehouse_core::metrics::{init_metrics, start_metrics_server};
//!
//! let handle = init_metrics();
//! start_metrics_server(9091, handle).await?;
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: `relay_`
//! - Suffix: `_total` for counters
//! - Labels: only bounded sets (e.g. the rejection rule)

use std::net::SocketAddr;

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::policy::Rejection;

pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
pub const EVENTS_RECEIVED_TOTAL: &str = "relay_events_received_total";
pub const EVENTS_STORED_TOTAL: &str = "relay_events_stored_total";
pub const EVENTS_DUPLICATE_TOTAL: &str = "relay_events_duplicate_total";
pub const EVENTS_INVALID_TOTAL: &str = "relay_events_invalid_total";
pub const EVENTS_REJECTED_TOTAL: &str = "relay_events_rejected_total";
pub const SUBSCRIPTIONS_TOTAL: &str = "relay_subscriptions_total";

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_relay_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_relay_metrics();
    Some(handle)
}

/// Start the Prometheus metrics HTTP server on `0.0.0.0:<port>`.
///
/// Binds before returning so port conflicts surface at startup; serving
/// then continues on a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    Ok(())
}

fn register_relay_metrics() {
    // =========================================================================
    // Connections
    // =========================================================================

    describe_counter!(CONNECTIONS_TOTAL, "Websocket sessions opened");
    describe_gauge!(CONNECTIONS_ACTIVE, "Websocket sessions currently open");

    // =========================================================================
    // Events
    // =========================================================================

    describe_counter!(EVENTS_RECEIVED_TOTAL, "EVENT messages received");
    describe_counter!(EVENTS_STORED_TOTAL, "Events newly written to storage");
    describe_counter!(
        EVENTS_DUPLICATE_TOTAL,
        "Events already stored or superseded by a newer version"
    );
    describe_counter!(
        EVENTS_INVALID_TOTAL,
        "Events failing structure, ID or signature checks"
    );
    describe_counter!(
        EVENTS_REJECTED_TOTAL,
        "Events refused by the admission policy (label: reason)"
    );

    // =========================================================================
    // Subscriptions
    // =========================================================================

    describe_counter!(SUBSCRIPTIONS_TOTAL, "REQ subscriptions opened");
}

// =============================================================================
// Metric Recording Helpers
// =============================================================================

/// Count an admission rejection under its rule label.
pub fn record_rejection(rejection: &Rejection) {
    metrics::counter!(EVENTS_REJECTED_TOTAL, "reason" => rejection.label()).increment(1);
}

/// Increment a counter.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Move a gauge up or down.
#[inline]
pub fn adjust_gauge(name: &'static str, delta: f64) {
    if delta >= 0.0 {
        metrics::gauge!(name).increment(delta);
    } else {
        metrics::gauge!(name).decrement(-delta);
    }
}
