//! Key/Value Backend Contract
//!
//! The broker persists everything — message payloads, head/tail anchors,
//! catalogs, line cursors — through this one seam. Any store that can
//! honor four operations over `string → bytes` can back a Linehouse
//! broker.
//!
//! ## Contract
//!
//! - `get` returns `Ok(None)` for a missing key (absence is not an error)
//! - `set` is durable once it returns `Ok`; a later `get` of the same
//!   key observes the written bytes, and a rewrite of an existing key
//!   replaces its value cleanly
//! - `del` is idempotent; deleting a missing key is `Ok`
//! - there is **no** cross-key transaction and no iteration — the broker
//!   never asks for either
//!
//! ## Implementations
//!
//! - [`MemoryKv`]: in-process map; tests, embedding, and restart
//!   simulation (reopen a broker over the same store)
//! - [`FsKv`]: file per key on local disk for single-node deployments
//!
//! Production-grade backends (LSM stores, embedded databases) live
//! outside this repository and only need to implement [`KvStore`].
//!
//! ## Thread Safety
//!
//! Implementations must be `Send + Sync`; the broker shares one store
//! across all topics via `Arc<dyn KvStore>`.

pub mod fs;
pub mod memory;

pub use fs::FsKv;
pub use memory::MemoryKv;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, KvError>;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Storage backend seam: synchronous-feeling, durable, non-transactional.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key. `Ok(None)` means the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a key. Durable once this returns `Ok`; overwrites replace
    /// the prior value.
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> Result<()>;

    /// Release backend resources. The broker calls this exactly once,
    /// after all workers have stopped.
    async fn close(&self) -> Result<()>;
}
