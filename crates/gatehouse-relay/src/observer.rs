//! Connection lifecycle logging.

use std::net::SocketAddr;

use gatehouse_core::metrics::{self, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL};

use crate::engine::LifecycleHooks;

/// Logs session open/close and, in debug mode, every stored event.
///
/// Output goes through `tracing`, whose subscriber serializes concurrent
/// writers, so one observer is shared by all sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleObserver {
    debug: bool,
}

impl LifecycleObserver {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }
}

impl LifecycleHooks for LifecycleObserver {
    fn on_connect(&self, remote: SocketAddr) {
        metrics::increment(CONNECTIONS_TOTAL, 1);
        metrics::adjust_gauge(CONNECTIONS_ACTIVE, 1.0);
        tracing::info!(remote = %remote, "client connected");
    }

    fn on_disconnect(&self, remote: SocketAddr) {
        metrics::adjust_gauge(CONNECTIONS_ACTIVE, -1.0);
        tracing::info!(remote = %remote, "client disconnected");
    }

    fn on_event_persisted(&self, kind: u16, pubkey: &str) {
        if self.debug {
            tracing::debug!(kind, pubkey = %pubkey, "event stored");
        }
    }
}
