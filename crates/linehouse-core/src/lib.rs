//! Core types for Linehouse
//!
//! This crate holds the leaf types shared by every other Linehouse crate:
//!
//! - **Errors**: the queue-wide error enum and `Result` alias
//! - **Keys**: the persisted key grammar and the request key parser
//! - **Durations**: the human-readable duration text used for line
//!   recycle timeouts (`"30s"`, `"2m"`, `"100ms"`)
//! - **Snapshots**: the self-describing binary codec for broker/topic
//!   catalogs and line cursors
//!
//! It is intentionally a lightweight dependency: no async runtime, no
//! storage backends, just data.

pub mod duration;
pub mod error;
pub mod keys;
pub mod snapshot;

pub use duration::{format_duration, parse_duration};
pub use error::{Error, Result};
pub use keys::RequestKey;
pub use snapshot::{BrokerCatalog, InflightEntry, LineSnapshot, TopicCatalog};
