//! Coordinator Contract
//!
//! A Linehouse cluster is a set of independent brokers that tell each
//! other what topics and lines exist through an external coordination
//! service (etcd, Consul, or anything with registration + watch). This
//! crate defines the seam; the engine never couples correctness to it.
//!
//! ## Contract
//!
//! - brokers `announce` their own address on a heartbeat cadence
//! - creating a topic or line registers it; removing a line unregisters
//! - `watch` yields [`ClusterEvent`]s describing what peers registered,
//!   which a broker applies locally so every member serves the same
//!   catalog
//! - **every operation is best-effort**: the engine logs coordinator
//!   failures and keeps serving; push/pop never block on coordination
//!
//! ## Implementations
//!
//! - [`NoopCoordinator`]: single-node operation, discards everything
//! - [`MemoryCoordinator`]: in-process fan-out for tests and embedded
//!   multi-broker setups
//!
//! Real coordination backends live outside this repository.

pub mod memory;

pub use memory::MemoryCoordinator;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Coordinator unavailable: {0}")]
    Unavailable(String),
}

/// A peer announcement observed through [`Coordinator::watch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// A peer registered a topic.
    TopicCreated { topic: String },
    /// A peer registered a line; `recycle` is the human-readable
    /// duration text the line was created with.
    LineCreated {
        topic: String,
        line: String,
        recycle: String,
    },
    /// A peer unregistered a line.
    LineRemoved { topic: String, line: String },
}

/// Cluster coordination seam. All methods are best-effort from the
/// broker's point of view: failures are logged, never surfaced to
/// queue operations.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Heartbeat the broker's own address.
    async fn announce(&self, addr: &str) -> Result<()>;

    /// Register a topic for peers to observe.
    async fn register_topic(&self, topic: &str) -> Result<()>;

    /// Register a line (with its recycle duration text).
    async fn register_line(&self, topic: &str, line: &str, recycle: &str) -> Result<()>;

    /// Unregister a line.
    async fn unregister_line(&self, topic: &str, line: &str) -> Result<()>;

    /// Subscribe to peer announcements. The channel closes when the
    /// coordinator goes away; a broker treats that as "no peers".
    async fn watch(&self) -> Result<mpsc::Receiver<ClusterEvent>>;
}

/// Coordinator for single-node deployments: accepts everything,
/// announces nothing, never emits events.
#[derive(Debug, Default)]
pub struct NoopCoordinator;

impl NoopCoordinator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Coordinator for NoopCoordinator {
    async fn announce(&self, _addr: &str) -> Result<()> {
        Ok(())
    }

    async fn register_topic(&self, _topic: &str) -> Result<()> {
        Ok(())
    }

    async fn register_line(&self, _topic: &str, _line: &str, _recycle: &str) -> Result<()> {
        Ok(())
    }

    async fn unregister_line(&self, _topic: &str, _line: &str) -> Result<()> {
        Ok(())
    }

    async fn watch(&self) -> Result<mpsc::Receiver<ClusterEvent>> {
        // Sender dropped immediately: subscribers see a closed, empty
        // stream.
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}
