//! Core types and policy for the Gatehouse relay.
//!
//! This crate provides:
//! - The NIP-01 event model, with ID and signature verification via the nostr crate
//! - Subscription filters and in-memory matching
//! - The admission policy that gates every inbound event
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod filter;
pub mod metrics;
pub mod policy;

pub use error::{Error, Result};
pub use event::Event;
pub use filter::Filter;
pub use policy::{AdmissionPolicy, PolicyLimits, Rejection, Verdict};
