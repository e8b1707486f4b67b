//! Filesystem Backend
//!
//! One file per key under a root directory, for single-node deployments
//! that want durability without an external database.
//!
//! Keys contain `/` and `:` (they are broker key-grammar separators), so
//! file names are percent-escaped: bytes outside `[A-Za-z0-9._-]` become
//! `%XX`. Writes go to a temp file first and are renamed into place so a
//! crash mid-write never leaves a half-written value behind; the temp
//! file is fsynced before the rename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{KvStore, Result};

/// File-per-key store rooted at a directory.
#[derive(Debug)]
pub struct FsKv {
    root: PathBuf,
}

impl FsKv {
    /// Open (or create) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "filesystem store opened");
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(escape_key(key))
    }
}

#[async_trait]
impl KvStore for FsKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let path = self.path_for(key);
        // `#` never appears in an escaped key, so temp names cannot
        // collide with any live key's file.
        let tmp = self.root.join(format!("{}#tmp", escape_key(key)));
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .await?;
            file.write_all(&value).await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self) -> Result<()> {
        // Every set is synced at write time; nothing buffered to flush.
        Ok(())
    }
}

fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_escape_key() {
        assert_eq!(escape_key("orders:7"), "orders%3A7");
        assert_eq!(escape_key("orders/billing"), "orders%2Fbilling");
        assert_eq!(escape_key("plain-name_1.x"), "plain-name_1.x");
    }

    #[test]
    fn test_escaped_keys_do_not_collide() {
        assert_ne!(escape_key("a:b"), escape_key("a/b"));
        assert_ne!(escape_key("a%3Ab"), escape_key("a:b"));
    }

    #[tokio::test]
    async fn test_set_get_del() {
        let dir = TempDir::new().unwrap();
        let kv = FsKv::open(dir.path()).await.unwrap();

        assert_eq!(kv.get("orders:0").await.unwrap(), None);

        kv.set("orders:0", Bytes::from("payload")).await.unwrap();
        assert_eq!(
            kv.get("orders:0").await.unwrap(),
            Some(Bytes::from("payload"))
        );

        kv.del("orders:0").await.unwrap();
        assert_eq!(kv.get("orders:0").await.unwrap(), None);

        // Idempotent delete.
        kv.del("orders:0").await.unwrap();
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let dir = TempDir::new().unwrap();
        let kv = FsKv::open(dir.path()).await.unwrap();

        kv.set("k", Bytes::from("first")).await.unwrap();
        kv.set("k", Bytes::from("second")).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(Bytes::from("second")));
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let kv = FsKv::open(dir.path()).await.unwrap();
            kv.set("orders/billing", Bytes::from("cursor")).await.unwrap();
            kv.close().await.unwrap();
        }
        let kv = FsKv::open(dir.path()).await.unwrap();
        assert_eq!(
            kv.get("orders/billing").await.unwrap(),
            Some(Bytes::from("cursor"))
        );
    }
}
