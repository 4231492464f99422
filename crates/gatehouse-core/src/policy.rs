//! Event admission policy.
//!
//! Every inbound event is judged against the operator's limits before the
//! relay stores or forwards it. Rules run in a fixed order and the first
//! failing rule decides the verdict:
//!
//! 1. Content length (bytes), when `max_content_length > 0`
//! 2. Tag count, when `max_event_tags > 0`
//! 3. Kind allow-list, when non-empty
//! 4. Author whitelist, when non-empty
//!
//! The size checks come first so oversized input is turned away before any
//! set lookup. Rejection reasons are sent verbatim to clients in `OK`
//! messages, so their wording is part of the relay's external contract.

use std::collections::HashSet;
use std::fmt;

use crate::event::Event;

/// Operator limits the policy enforces. Zero or empty means "no limit".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyLimits {
    /// Maximum content length in bytes (0 = unlimited).
    pub max_content_length: usize,
    /// Maximum number of tags (0 = unlimited).
    pub max_event_tags: usize,
    /// Allowed kinds, in configured order (empty = all kinds).
    pub allowed_kinds: Vec<u16>,
    /// Allowed author pubkeys (empty = all authors).
    pub whitelisted_pubkeys: HashSet<String>,
}

impl PolicyLimits {
    pub fn whitelist_enabled(&self) -> bool {
        !self.whitelisted_pubkeys.is_empty()
    }
}

/// Why an event was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    ContentTooLong { max: usize },
    TooManyTags { max: usize },
    KindNotAllowed { kind: u16, allowed: Vec<u16> },
    PubkeyNotWhitelisted,
}

impl Rejection {
    /// Short stable label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ContentTooLong { .. } => "content_length",
            Self::TooManyTags { .. } => "tag_count",
            Self::KindNotAllowed { .. } => "kind",
            Self::PubkeyNotWhitelisted => "whitelist",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentTooLong { max } => {
                write!(f, "blocked: content length exceeds maximum of {max}")
            }
            Self::TooManyTags { max } => {
                write!(f, "blocked: number of tags exceeds maximum of {max}")
            }
            Self::KindNotAllowed { kind, allowed } => write!(
                f,
                "blocked: event kind {kind} not allowed, allowed kinds: {}",
                kind_list(allowed)
            ),
            // Must not name any whitelisted key.
            Self::PubkeyNotWhitelisted => f.write_str("blocked: pubkey not in whitelist"),
        }
    }
}

/// Outcome of evaluating one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_reject(&self) -> bool {
        matches!(self, Self::Reject(_))
    }

    /// Client-facing reason; empty when accepted.
    pub fn reason(&self) -> String {
        match self {
            Self::Accept => String::new(),
            Self::Reject(rejection) => rejection.to_string(),
        }
    }
}

/// The admission gate. Cheap to share: holds only read-only limits.
#[derive(Debug, Clone, Default)]
pub struct AdmissionPolicy {
    limits: PolicyLimits,
}

impl AdmissionPolicy {
    pub fn new(limits: PolicyLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &PolicyLimits {
        &self.limits
    }

    /// Judge an event. Never fails; the first violated rule wins.
    pub fn evaluate(&self, event: &Event) -> Verdict {
        let limits = &self.limits;

        if limits.max_content_length > 0 && event.content.len() > limits.max_content_length {
            return Verdict::Reject(Rejection::ContentTooLong {
                max: limits.max_content_length,
            });
        }

        if limits.max_event_tags > 0 && event.tags.len() > limits.max_event_tags {
            return Verdict::Reject(Rejection::TooManyTags {
                max: limits.max_event_tags,
            });
        }

        if !limits.allowed_kinds.is_empty() && !limits.allowed_kinds.contains(&event.kind) {
            return Verdict::Reject(Rejection::KindNotAllowed {
                kind: event.kind,
                allowed: limits.allowed_kinds.clone(),
            });
        }

        if limits.whitelist_enabled() && !limits.whitelisted_pubkeys.contains(&event.pubkey) {
            return Verdict::Reject(Rejection::PubkeyNotWhitelisted);
        }

        Verdict::Accept
    }
}

/// Render kinds as `[1 30023]`.
pub fn kind_list(kinds: &[u16]) -> String {
    let joined = kinds
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    format!("[{joined}]")
}
