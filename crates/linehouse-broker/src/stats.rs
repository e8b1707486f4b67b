//! Queue Statistics
//!
//! Structured snapshots of topic and line state for monitoring and the
//! `stat` request. Everything here is serde-serializable so front ends
//! can hand it out as JSON unchanged.

use serde::{Deserialize, Serialize};

/// Stats for one topic, including each attached line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStat {
    pub name: String,
    /// Lowest id still retained in storage.
    pub head: u64,
    /// One past the highest id ever pushed.
    pub tail: u64,
    /// Messages currently retained (`tail - head`).
    pub count: u64,
    pub lines: Vec<LineStat>,
}

/// Stats for one consumer line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineStat {
    pub name: String,
    /// Recycle timeout as human-readable text (`"0s"` = auto-ack).
    pub recycle: String,
    /// Next id this line will deliver.
    pub head: u64,
    /// Lowest id not yet confirmed.
    pub ihead: u64,
    /// Deliveries currently awaiting confirmation.
    pub inflight: usize,
    /// Messages pushed but not yet delivered (`topic.tail - head`).
    pub pending: u64,
}

/// Result of a routed `stat` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueueStat {
    Topic(TopicStat),
    Line(LineStat),
}
