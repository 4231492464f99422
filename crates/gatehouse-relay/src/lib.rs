//! Gatehouse Relay - a policy-gated Nostr relay.
//!
//! Every inbound event passes the admission policy from `gatehouse-core`
//! before it is stored or forwarded. The HTTP root serves three audiences
//! from one URL: websocket clients, tools asking for the capability document
//! as JSON, and people opening the relay in a browser.
//!
//! # Architecture
//!
//! - **Dispatch**: Picks the branch for a root request from its headers
//! - **Engine**: Websocket sessions, subscriptions and live fan-out
//! - **Store**: SQLite event storage behind the `EventStore` trait
//! - **Observer**: Connection lifecycle logging and metrics

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod observer;
pub mod routes;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
pub use store::StoreError;
