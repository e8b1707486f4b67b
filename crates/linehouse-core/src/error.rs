//! Error Types for Linehouse
//!
//! This module defines the error enum shared by the whole queue surface.
//!
//! ## Error Categories
//!
//! ### Request Errors
//! - `BadKey`: request key is malformed (wrong shape, unparsable id)
//! - `BadRequest`: request is well-formed but invalid (empty payload)
//!
//! ### Catalog Errors
//! - `TopicAlreadyExists` / `TopicNotFound`
//! - `LineAlreadyExists` / `LineNotFound`
//!
//! ### Delivery Errors
//! - `NotInFlight`: confirm targeted an id that is not currently awaiting
//!   confirmation (already confirmed, already swept, or never delivered)
//!
//! ### Persistence Errors
//! - `Codec`: a persisted catalog or cursor snapshot failed to decode
//! - `Storage`: the key/value backend failed; the in-memory mutation that
//!   triggered the write has been rolled back
//!
//! ## Usage
//!
//! All queue operations return `Result<T>` which is aliased to
//! `Result<T, Error>`, so `?` propagation works throughout. Key parse
//! failures (`BadKey`) stay distinguishable from lookup failures
//! (`TopicNotFound` / `LineNotFound`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Bad key: {0}")]
    BadKey(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Line already exists: {topic}/{line}")]
    LineAlreadyExists { topic: String, line: String },

    #[error("Line not found: {topic}/{line}")]
    LineNotFound { topic: String, line: String },

    #[error("Not in flight: {0}")]
    NotInFlight(String),

    #[error("Snapshot codec error: {0}")]
    Codec(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Wrap a backend failure as a storage error.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }
}
