//! NIP-01 subscription filters.
//!
//! A filter selects events by:
//! - Event IDs
//! - Authors
//! - Kinds
//! - Time range (`since` / `until`, both inclusive)
//! - Single-letter tag queries (`#e`, `#p`, ...)
//!
//! Conditions inside a filter are ANDed; values inside one condition are ORed.
//! Keys the relay does not understand (e.g. NIP-50 `search`) are ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;

/// NIP-01 filter as sent in `REQ` and `COUNT` messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFilter")]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Tag queries keyed with the `#` prefix (e.g. `"#e"`).
    ///
    /// Keys that are not `#` plus one ASCII letter are ignored when matching.
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

/// Wire shape of a filter before unknown keys are dropped.
#[derive(Deserialize)]
struct RawFilter {
    #[serde(default)]
    ids: Option<Vec<String>>,
    #[serde(default)]
    authors: Option<Vec<String>>,
    #[serde(default)]
    kinds: Option<Vec<u16>>,
    #[serde(default)]
    since: Option<u64>,
    #[serde(default)]
    until: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl TryFrom<RawFilter> for Filter {
    type Error = String;

    fn try_from(raw: RawFilter) -> Result<Self, Self::Error> {
        let mut tags = BTreeMap::new();
        for (key, value) in raw.extra {
            if !key.starts_with('#') {
                continue;
            }
            let values: Vec<String> = serde_json::from_value(value)
                .map_err(|_| format!("tag query {key} must be an array of strings"))?;
            tags.insert(key, values);
        }

        Ok(Self {
            ids: raw.ids,
            authors: raw.authors,
            kinds: raw.kinds,
            since: raw.since,
            until: raw.until,
            limit: raw.limit,
            tags,
        })
    }
}

impl Filter {
    /// Create an empty filter (matches every event).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a tag condition. `tag_name` may be given with or without `#`.
    pub fn tag(
        mut self,
        tag_name: &str,
        values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let key = if tag_name.starts_with('#') {
            tag_name.to_string()
        } else {
            format!("#{tag_name}")
        };
        self.tags
            .insert(key, values.into_iter().map(Into::into).collect());
        self
    }

    /// Iterate over the well-formed tag conditions as `(letter, values)`.
    pub fn tag_conditions(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.tags.iter().filter_map(|(key, values)| {
            let letter = key.strip_prefix('#')?;
            let mut chars = letter.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => Some((letter, values.as_slice())),
                _ => None,
            }
        })
    }

    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref ids) = self.ids {
            if !ids.iter().any(|id| *id == event.id) {
                return false;
            }
        }

        if let Some(ref authors) = self.authors {
            if !authors.iter().any(|a| *a == event.pubkey) {
                return false;
            }
        }

        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }

        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }

        self.tag_conditions().all(|(letter, values)| {
            event
                .tag_values(letter)
                .any(|value| values.iter().any(|v| v == value))
        })
    }
}
