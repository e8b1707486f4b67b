//! Key Grammar
//!
//! Every persisted artifact and every routed request in Linehouse is
//! addressed by a string key. This module owns both sides of that
//! grammar:
//!
//! ## Persisted keys
//!
//! | key | contents |
//! |---|---|
//! | `UnitedQueueKey` | broker catalog (topic names) |
//! | `{topic}` | topic catalog (line names) |
//! | `{topic}:head` / `{topic}:tail` | 8-byte little-endian u64 anchors |
//! | `{topic}:{id}` | opaque message payload |
//! | `{topic}/{line}` | line cursor snapshot |
//! | `{topic}/{line}:recycle` | human-readable recycle duration |
//!
//! ## Request keys
//!
//! Requests address a topic (`orders`), a line (`orders/billing`), or a
//! single delivered message (`orders/billing/42`). [`RequestKey::parse`]
//! turns the string into a typed value; a malformed key is a `BadKey`
//! error, which callers keep distinct from "parsed fine but the topic
//! does not exist".
//!
//! Topic and line names are case-sensitive, non-empty, and may not
//! contain `/` or `:` (both are separators in the persisted keys).

use crate::error::{Error, Result};

/// Key under which the broker-level catalog is persisted.
pub const BROKER_CATALOG_KEY: &str = "UnitedQueueKey";

/// A parsed request key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKey {
    /// `topic` — a topic-level operation.
    Topic(String),
    /// `topic/line` — a line-level operation.
    Line { topic: String, line: String },
    /// `topic/line/id` — a single-message operation (confirm).
    Message { topic: String, line: String, id: u64 },
}

impl RequestKey {
    /// Parse a request key of shape `topic`, `topic/line`, or
    /// `topic/line/id`.
    pub fn parse(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [topic] => {
                validate_name(topic)?;
                Ok(RequestKey::Topic((*topic).to_string()))
            }
            [topic, line] => {
                validate_name(topic)?;
                validate_name(line)?;
                Ok(RequestKey::Line {
                    topic: (*topic).to_string(),
                    line: (*line).to_string(),
                })
            }
            [topic, line, id] => {
                validate_name(topic)?;
                validate_name(line)?;
                let id = id
                    .parse::<u64>()
                    .map_err(|e| Error::BadKey(format!("message id {id:?}: {e}")))?;
                Ok(RequestKey::Message {
                    topic: (*topic).to_string(),
                    line: (*line).to_string(),
                    id,
                })
            }
            _ => Err(Error::BadKey(format!(
                "expected 1-3 `/`-separated parts, got {}",
                parts.len()
            ))),
        }
    }
}

/// Check that a topic or line name is usable inside the key grammar.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::BadKey("empty name".to_string()));
    }
    if name.contains('/') || name.contains(':') {
        return Err(Error::BadKey(format!(
            "name {name:?} contains a reserved separator"
        )));
    }
    Ok(())
}

/// Key of the payload for message `id` on `topic`.
pub fn message_key(topic: &str, id: u64) -> String {
    format!("{topic}:{id}")
}

/// Key of the topic head anchor.
pub fn head_key(topic: &str) -> String {
    format!("{topic}:head")
}

/// Key of the topic tail anchor.
pub fn tail_key(topic: &str) -> String {
    format!("{topic}:tail")
}

/// Key of the line cursor snapshot.
pub fn line_key(topic: &str, line: &str) -> String {
    format!("{topic}/{line}")
}

/// Key of the line recycle duration.
pub fn recycle_key(topic: &str, line: &str) -> String {
    format!("{topic}/{line}:recycle")
}
