//! In-Memory Backend
//!
//! A `HashMap` behind an async `RwLock`. Not durable across process
//! restarts, which is exactly what makes it useful: tests simulate a
//! broker crash by closing one broker and opening another over the same
//! `Arc<MemoryKv>`.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::{KvStore, Result};

/// In-process key/value store.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Bytes>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored. Test helper.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no keys. Test helper.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Nothing to flush; the map stays readable so a test can reopen
        // a broker over the same store.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let kv = MemoryKv::new();

        assert_eq!(kv.get("missing").await.unwrap(), None);

        kv.set("k", Bytes::from("v1")).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(Bytes::from("v1")));

        // Overwrite replaces.
        kv.set("k", Bytes::from("v2")).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(Bytes::from("v2")));

        kv.del("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_del_missing_is_ok() {
        let kv = MemoryKv::new();
        kv.del("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_survives_close() {
        let kv = MemoryKv::new();
        kv.set("k", Bytes::from("v")).await.unwrap();
        kv.close().await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(Bytes::from("v")));
    }
}
