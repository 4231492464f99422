//! Inbound event model and verification.
//!
//! The relay keeps events in their plain NIP-01 shape (hex strings, raw tag
//! arrays) so that policy checks and storage never re-encode anything. The
//! nostr crate is only consulted to verify the ID hash and the Schnorr
//! signature of freshly received events.

use nostr::JsonUtil; // Required for Event::from_json()
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A signed Nostr event as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-byte event ID (lowercase hex).
    pub id: String,
    /// 32-byte author public key (lowercase hex).
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: u64,
    /// Event kind.
    pub kind: u16,
    /// Ordered tag records, each a non-empty list of strings.
    pub tags: Vec<Vec<String>>,
    /// Free-text content.
    pub content: String,
    /// 64-byte Schnorr signature (lowercase hex).
    pub sig: String,
}

impl Event {
    /// Parse an event from JSON and verify its ID and signature.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - JSON parsing fails
    /// - A hex field has the wrong length or alphabet
    /// - The ID doesn't match the hash of `[0, pubkey, created_at, kind, tags, content]`
    /// - The signature is not valid for the ID and pubkey
    pub fn from_json_verified(json: &str) -> Result<Self> {
        let event: Event = serde_json::from_str(json)?;
        event.check_structure()?;

        let signed = nostr::Event::from_json(json)?;
        if !signed.verify_id() {
            return Err(Error::InvalidEventId(event.id));
        }
        if !signed.verify_signature() {
            return Err(Error::InvalidSignature(
                "signature verification failed".to_string(),
            ));
        }

        Ok(event)
    }

    /// Check hex field shapes without touching any cryptography.
    pub fn check_structure(&self) -> Result<()> {
        check_hex("id", &self.id, 64)?;
        check_hex("pubkey", &self.pubkey, 64)?;
        check_hex("sig", &self.sig, 128)?;
        if self.tags.iter().any(|tag| tag.is_empty()) {
            return Err(Error::InvalidField {
                field: "tags",
                reason: "empty tag".to_string(),
            });
        }
        Ok(())
    }

    /// Ephemeral events are relayed but never stored.
    pub fn is_ephemeral(&self) -> bool {
        (20000..30000).contains(&self.kind)
    }

    /// Replaceable events keep one version per `(pubkey, kind)`.
    pub fn is_replaceable(&self) -> bool {
        self.kind == 0 || self.kind == 3 || (10000..20000).contains(&self.kind)
    }

    /// Addressable events keep one version per `(pubkey, kind, d)`.
    pub fn is_addressable(&self) -> bool {
        (30000..40000).contains(&self.kind)
    }

    /// NIP-09 deletion request.
    pub fn is_deletion(&self) -> bool {
        self.kind == 5
    }

    /// Value of the first `d` tag, or `""` when absent.
    pub fn d_tag(&self) -> &str {
        self.tag_values("d").next().unwrap_or("")
    }

    /// Values (second element) of every tag with the given name.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.len() >= 2 && tag[0] == name)
            .map(|tag| tag[1].as_str())
    }
}

fn check_hex(field: &'static str, value: &str, len: usize) -> Result<()> {
    if value.len() != len {
        return Err(Error::InvalidField {
            field,
            reason: format!("expected {len} hex characters, got {}", value.len()),
        });
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(Error::InvalidField {
            field,
            reason: "not lowercase hex".to_string(),
        });
    }
    Ok(())
}
