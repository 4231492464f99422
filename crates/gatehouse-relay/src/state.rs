//! Application state shared across all request handlers.

use std::sync::Arc;

use gatehouse_core::AdmissionPolicy;

use crate::config::Config;
use crate::engine::RelayEngine;
use crate::observer::LifecycleObserver;
use crate::store::{EventStore, SqliteStore, StoreResult};

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,

    /// Protocol engine shared by every websocket session.
    pub engine: Arc<RelayEngine>,
}

impl AppState {
    /// Build state around an existing store.
    ///
    /// The admission policy is derived from `config`, so the capability
    /// document and the enforced limits always come from the same values.
    pub fn new(config: Config, store: Arc<dyn EventStore>) -> Self {
        let policy = AdmissionPolicy::new(config.policy_limits());
        let observer = Arc::new(LifecycleObserver::new(config.debug));
        let engine = RelayEngine::new(policy, store, observer);

        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
        }
    }

    /// Open the SQLite store at `config.db_path` and build state around it.
    pub fn open(config: Config) -> StoreResult<Self> {
        let store = SqliteStore::open(&config.db_path)?;
        Ok(Self::new(config, Arc::new(store)))
    }
}
