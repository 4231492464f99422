//! Per-connection subscription table.

use std::collections::HashMap;

use gatehouse_core::{Event, Filter};

/// Maximum length of a subscription ID.
pub const MAX_SUBSCRIPTION_ID_LEN: usize = 64;

/// Maximum filters accepted in one REQ or COUNT.
pub const MAX_FILTERS_PER_REQ: usize = 32;

/// Maximum live subscriptions per connection.
pub const MAX_SUBSCRIPTIONS: usize = 64;

/// Check a client-chosen subscription ID.
pub fn validate_subscription_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("invalid: subscription ID must not be empty".to_string());
    }
    if id.chars().count() > MAX_SUBSCRIPTION_ID_LEN {
        return Err(format!(
            "invalid: subscription ID longer than {MAX_SUBSCRIPTION_ID_LEN} characters"
        ));
    }
    Ok(())
}

/// Live subscriptions of one connection, keyed by subscription ID.
#[derive(Debug, Default)]
pub struct Subscriptions {
    active: HashMap<String, Vec<Filter>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a subscription.
    ///
    /// Re-using an existing ID replaces its filters and never counts against
    /// the limit.
    pub fn insert(&mut self, id: &str, filters: Vec<Filter>) -> Result<(), String> {
        if !self.active.contains_key(id) && self.active.len() >= MAX_SUBSCRIPTIONS {
            return Err(format!(
                "blocked: too many subscriptions (max {MAX_SUBSCRIPTIONS})"
            ));
        }
        self.active.insert(id.to_string(), filters);
        Ok(())
    }

    /// Drop a subscription. Returns `false` if it was not open.
    pub fn remove(&mut self, id: &str) -> bool {
        self.active.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// IDs of every subscription with at least one filter matching `event`.
    pub fn matching(&self, event: &Event) -> Vec<&str> {
        self.active
            .iter()
            .filter(|(_, filters)| filters.iter().any(|f| f.matches(event)))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
