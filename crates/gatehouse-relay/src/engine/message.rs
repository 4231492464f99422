//! Client and relay message framing (NIP-01, NIP-45).
//!
//! Client messages are JSON arrays whose first element names the verb:
//!
//! - `["EVENT", <event>]`
//! - `["REQ", <sub_id>, <filter>...]`
//! - `["COUNT", <sub_id>, <filter>...]`
//! - `["CLOSE", <sub_id>]`
//!
//! Relay replies are built with the helpers at the bottom of this module.

use gatehouse_core::{Event, Filter};
use serde_json::{Value, json};

use super::subscription::{MAX_FILTERS_PER_REQ, validate_subscription_id};

/// A parsed client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Raw event object; verification happens in the engine.
    Event(Value),
    Req { sub_id: String, filters: Vec<Filter> },
    Count { sub_id: String, filters: Vec<Filter> },
    Close(String),
}

/// Why a client message could not be parsed, and how to answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    /// Answer with `["NOTICE", msg]`.
    Notice(String),
    /// Answer with `["CLOSED", sub_id, msg]`.
    Closed { sub_id: String, reason: String },
}

impl Refusal {
    pub fn into_reply(self) -> Value {
        match self {
            Self::Notice(msg) => notice(&msg),
            Self::Closed { sub_id, reason } => closed(&sub_id, &reason),
        }
    }
}

impl ClientMessage {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, Refusal> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Refusal::Notice(format!("invalid: malformed JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, Refusal> {
        let Value::Array(mut parts) = value else {
            return Err(Refusal::Notice(
                "invalid: message must be a JSON array".to_string(),
            ));
        };
        let verb = parts
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Refusal::Notice("invalid: missing message type".to_string()))?
            .to_string();

        match verb.as_str() {
            "EVENT" => {
                if parts.len() != 2 {
                    return Err(Refusal::Notice(
                        "invalid: EVENT message must have 2 elements".to_string(),
                    ));
                }
                Ok(Self::Event(parts.swap_remove(1)))
            }
            "REQ" | "COUNT" => {
                let sub_id = subscription_id(&parts, &verb)?;
                let filters = parse_filters(&sub_id, &parts[2..])?;
                if verb == "REQ" {
                    Ok(Self::Req { sub_id, filters })
                } else {
                    Ok(Self::Count { sub_id, filters })
                }
            }
            "CLOSE" => {
                if parts.len() != 2 {
                    return Err(Refusal::Notice(
                        "invalid: CLOSE message must have 2 elements".to_string(),
                    ));
                }
                Ok(Self::Close(subscription_id(&parts, &verb)?))
            }
            other => Err(Refusal::Notice(format!(
                "invalid: unsupported message type {other:?}"
            ))),
        }
    }
}

fn subscription_id(parts: &[Value], verb: &str) -> Result<String, Refusal> {
    let id = parts
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| Refusal::Notice(format!("invalid: {verb} needs a subscription ID")))?;
    validate_subscription_id(id).map_err(Refusal::Notice)?;
    Ok(id.to_string())
}

fn parse_filters(sub_id: &str, raw: &[Value]) -> Result<Vec<Filter>, Refusal> {
    let refuse = |reason: String| Refusal::Closed {
        sub_id: sub_id.to_string(),
        reason,
    };

    if raw.is_empty() {
        return Err(refuse("invalid: at least one filter is required".to_string()));
    }
    if raw.len() > MAX_FILTERS_PER_REQ {
        return Err(refuse(format!(
            "blocked: too many filters (max {MAX_FILTERS_PER_REQ})"
        )));
    }

    raw.iter()
        .map(|value| {
            serde_json::from_value::<Filter>(value.clone())
                .map_err(|e| refuse(format!("invalid: malformed filter: {e}")))
        })
        .collect()
}

// =============================================================================
// Relay Messages
// =============================================================================

pub fn ok(event_id: &str, accepted: bool, message: &str) -> Value {
    json!(["OK", event_id, accepted, message])
}

pub fn event(sub_id: &str, event: &Event) -> Value {
    json!(["EVENT", sub_id, event])
}

pub fn eose(sub_id: &str) -> Value {
    json!(["EOSE", sub_id])
}

pub fn closed(sub_id: &str, reason: &str) -> Value {
    json!(["CLOSED", sub_id, reason])
}

pub fn notice(message: &str) -> Value {
    json!(["NOTICE", message])
}

pub fn count(sub_id: &str, count: u64) -> Value {
    json!(["COUNT", sub_id, { "count": count }])
}
