//! Machine-readable capability document.

use axum::Json;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use gatehouse_core::PolicyLimits;
use serde::Serialize;

use crate::state::AppState;

/// Relay identity plus the limits the admission policy enforces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityDocument {
    pub name: String,
    pub description: String,
    pub pubkey: String,
    pub config: PolicySummary,
}

/// Non-sensitive view of the active policy.
///
/// Only the presence of a whitelist is exposed, never its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySummary {
    pub allowed_kinds: Vec<u16>,
    pub whitelist_enabled: bool,
    pub max_content_length: usize,
    pub max_event_tags: usize,
    pub debug_enabled: bool,
}

impl PolicySummary {
    pub fn new(limits: &PolicyLimits, debug: bool) -> Self {
        Self {
            allowed_kinds: limits.allowed_kinds.clone(),
            whitelist_enabled: limits.whitelist_enabled(),
            max_content_length: limits.max_content_length,
            max_event_tags: limits.max_event_tags,
            debug_enabled: debug,
        }
    }
}

impl CapabilityDocument {
    /// Build from the state's live policy, not from a copy of the config.
    pub fn from_state(state: &AppState) -> Self {
        let config = &state.config;
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            pubkey: config.pubkey.clone(),
            config: PolicySummary::new(state.engine.policy().limits(), config.debug),
        }
    }
}

/// JSON response, readable from any origin.
pub fn respond(state: &AppState) -> Response {
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(CapabilityDocument::from_state(state)),
    )
        .into_response()
}
