//! Linehouse Queue Engine
//!
//! A persistent message queue broker organized as a two-level
//! hierarchy:
//!
//! - **Topics** are durable append-only logs of opaque payloads keyed
//!   by monotonically increasing 64-bit ids.
//! - **Lines** are independent consumer cursors over a topic, each with
//!   its own delivery head, in-flight tracking, and optional visibility
//!   timeout (recycle) for at-least-once redelivery.
//!
//! Everything persists through the pluggable [`linehouse_kv::KvStore`]
//! backend and survives restarts; a per-topic background worker
//! snapshots consumer cursors and reclaims storage for messages every
//! line has finished with. Cluster membership and topic/line
//! announcements flow through the pluggable
//! [`linehouse_cluster::Coordinator`], strictly best-effort.
//!
//! ## Data Flow
//!
//! ```text
//! Producer ──► Broker::push ──► Topic (tail++) ──► KvStore
//! Consumer ──► Broker::pop  ──► Line (head++, in-flight) ──► payload
//! Confirm  ──► Broker::confirm ──► Line (ihead sweep)
//! Worker   ──► clean pass ──► delete ids below every line's frontier
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use linehouse_broker::{Broker, BrokerConfig};
//! use linehouse_cluster::NoopCoordinator;
//! use linehouse_core::parse_duration;
//! use linehouse_kv::FsKv;
//!
//! let kv = Arc::new(FsKv::open("./data").await?);
//! let broker = Broker::open(kv, Arc::new(NoopCoordinator::new()),
//!                           BrokerConfig::default()).await?;
//!
//! broker.create("orders", None).await?;
//! broker.create("orders/billing", Some(parse_duration("30s")?)).await?;
//! broker.push("orders", payload).await?;
//! let delivered = broker.pop("orders/billing").await?;
//! broker.confirm("orders/billing/0").await?;
//! broker.close().await;
//! ```

pub mod broker;
pub mod config;
pub mod stats;

mod heartbeat;
mod line;
mod topic;
mod worker;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use stats::{LineStat, QueueStat, TopicStat};

pub use linehouse_core::{Error, Result};
