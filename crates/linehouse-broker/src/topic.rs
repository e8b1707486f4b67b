//! Topic: a durable append-only message log plus its consumer lines
//!
//! A topic owns the contiguous id range `[head, tail)`. Producers only
//! ever move `tail` (under the tail write lock, making it the single
//! source of message order); the background worker only ever moves
//! `head`, reclaiming storage for ids every line has finished with.
//! Lines are looked up under a reader lock and do their own
//! bookkeeping under their own lock.
//!
//! Lock order is topics → lines → head → tail → line; head and tail are
//! only held together by `empty` and `remove`, head first. `remove`
//! stops the worker before taking any lock, so the reclamation pass can
//! never be on the other side of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use linehouse_cluster::Coordinator;
use linehouse_core::snapshot::{self, TopicCatalog};
use linehouse_core::{format_duration, keys, parse_duration, Error, LineSnapshot, Result};
use linehouse_kv::KvStore;

use crate::config::BrokerConfig;
use crate::line::Line;
use crate::stats::{LineStat, TopicStat};
use crate::worker::TopicWorker;

pub(crate) struct Topic {
    name: String,
    kv: Arc<dyn KvStore>,
    coordinator: Arc<dyn Coordinator>,
    config: BrokerConfig,
    lines: RwLock<HashMap<String, Arc<Line>>>,
    head: RwLock<u64>,
    tail: RwLock<u64>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Topic {
    /// Create a fresh topic: persist zeroed anchors, then start the
    /// background worker.
    pub(crate) async fn create(
        name: &str,
        kv: Arc<dyn KvStore>,
        coordinator: Arc<dyn Coordinator>,
        config: BrokerConfig,
    ) -> Result<Arc<Self>> {
        let topic = Self::construct(name, kv, coordinator, config, 0, 0, HashMap::new());
        topic.export_head(0).await?;
        topic.export_tail(0).await?;
        let topic = Arc::new(topic);
        topic.start_worker().await;
        Ok(topic)
    }

    /// Rebuild a topic from storage. Missing anchors or catalog fail
    /// the whole topic (the caller skips it); a broken line is skipped
    /// with a warning and the rest of the topic still loads.
    pub(crate) async fn load(
        name: &str,
        kv: Arc<dyn KvStore>,
        coordinator: Arc<dyn Coordinator>,
        config: BrokerConfig,
    ) -> Result<Arc<Self>> {
        let catalog_data = kv
            .get(name)
            .await
            .map_err(Error::storage)?
            .ok_or_else(|| Error::Storage(format!("topic {name}: catalog missing")))?;
        let catalog = TopicCatalog::decode(&catalog_data)?;

        let head_data = kv
            .get(&keys::head_key(name))
            .await
            .map_err(Error::storage)?
            .ok_or_else(|| Error::Storage(format!("topic {name}: head anchor missing")))?;
        let head = snapshot::decode_anchor(&head_data)?;

        let tail_data = kv
            .get(&keys::tail_key(name))
            .await
            .map_err(Error::storage)?
            .ok_or_else(|| Error::Storage(format!("topic {name}: tail anchor missing")))?;
        let tail = snapshot::decode_anchor(&tail_data)?;

        let mut lines = HashMap::new();
        for line_name in &catalog.lines {
            match Self::load_line(&kv, name, line_name, head, tail).await {
                Ok(line) => {
                    lines.insert(line_name.clone(), Arc::new(line));
                    debug!(topic = name, line = %line_name, "line recovered");
                }
                Err(e) => {
                    warn!(topic = name, line = %line_name, error = %e,
                          "skipping line during recovery");
                }
            }
        }

        let topic = Arc::new(Self::construct(
            name,
            kv,
            coordinator,
            config,
            head,
            tail,
            lines,
        ));
        topic.start_worker().await;
        info!(topic = name, head, tail, "topic recovered");
        Ok(topic)
    }

    async fn load_line(
        kv: &Arc<dyn KvStore>,
        topic: &str,
        line: &str,
        topic_head: u64,
        topic_tail: u64,
    ) -> Result<Line> {
        let recycle_data = kv
            .get(&keys::recycle_key(topic, line))
            .await
            .map_err(Error::storage)?
            .ok_or_else(|| Error::Storage(format!("line {topic}/{line}: recycle missing")))?;
        let recycle_text = std::str::from_utf8(&recycle_data)
            .map_err(|_| Error::Codec(format!("line {topic}/{line}: recycle is not utf-8")))?;
        let recycle = parse_duration(recycle_text)?;

        let snapshot_data = kv
            .get(&keys::line_key(topic, line))
            .await
            .map_err(Error::storage)?
            .ok_or_else(|| Error::Storage(format!("line {topic}/{line}: snapshot missing")))?;
        let snapshot = LineSnapshot::decode(&snapshot_data)?;

        Ok(Line::restore(line, recycle, &snapshot, topic_head, topic_tail))
    }

    fn construct(
        name: &str,
        kv: Arc<dyn KvStore>,
        coordinator: Arc<dyn Coordinator>,
        config: BrokerConfig,
        head: u64,
        tail: u64,
        lines: HashMap<String, Arc<Line>>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            kv,
            coordinator,
            config,
            lines: RwLock::new(lines),
            head: RwLock::new(head),
            tail: RwLock::new(tail),
            shutdown_tx,
            worker: Mutex::new(None),
        }
    }

    async fn start_worker(self: &Arc<Self>) {
        let worker = TopicWorker::new(Arc::clone(self), self.shutdown_tx.subscribe());
        let handle = tokio::spawn(worker.run());
        *self.worker.lock().await = Some(handle);
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub(crate) async fn tail(&self) -> u64 {
        *self.tail.read().await
    }

    // -----------------------------------------------------------------
    // Produce
    // -----------------------------------------------------------------

    /// Append one message. The payload is durable and readable at its
    /// id before the new tail becomes visible.
    pub(crate) async fn push(&self, data: Bytes) -> Result<()> {
        if data.is_empty() {
            return Err(Error::BadRequest("message has no content".to_string()));
        }
        let mut tail = self.tail.write().await;
        self.kv
            .set(&keys::message_key(&self.name, *tail), data)
            .await
            .map_err(Error::storage)?;
        let next = *tail + 1;
        // Commit the tail in memory only once the anchor write landed;
        // a failed anchor write leaves the payload key behind, where
        // the next push at the same id overwrites it.
        self.export_tail(next).await?;
        *tail = next;
        Ok(())
    }

    /// Append a batch. Readers on this topic observe either none of the
    /// batch or all of it, because the tail lock is held throughout and
    /// the tail anchor is published once at the end.
    pub(crate) async fn push_many(&self, batch: Vec<Bytes>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tail = self.tail.write().await;
        let mut next = *tail;
        for data in batch {
            if data.is_empty() {
                return Err(Error::BadRequest("message has no content".to_string()));
            }
            self.kv
                .set(&keys::message_key(&self.name, next), data)
                .await
                .map_err(Error::storage)?;
            next += 1;
        }
        self.export_tail(next).await?;
        *tail = next;
        Ok(())
    }

    /// Read the payload stored at `id`.
    pub(crate) async fn fetch_message(&self, id: u64) -> Result<Bytes> {
        let key = keys::message_key(&self.name, id);
        self.kv
            .get(&key)
            .await
            .map_err(Error::storage)?
            .ok_or_else(|| Error::Storage(format!("message {key} missing from store")))
    }

    // -----------------------------------------------------------------
    // Consume
    // -----------------------------------------------------------------

    pub(crate) async fn pop(&self, line: &str) -> Result<Option<(u64, Bytes)>> {
        self.line(line).await?.pop(self).await
    }

    pub(crate) async fn pop_many(&self, line: &str, n: usize) -> Result<Vec<(u64, Bytes)>> {
        self.line(line).await?.pop_many(self, n).await
    }

    pub(crate) async fn confirm(&self, line: &str, id: u64) -> Result<()> {
        self.line(line).await?.confirm(id).await
    }

    pub(crate) async fn confirm_many(&self, line: &str, ids: &[u64]) -> Result<usize> {
        Ok(self.line(line).await?.confirm_many(ids).await)
    }

    // -----------------------------------------------------------------
    // Line management
    // -----------------------------------------------------------------

    pub(crate) async fn create_line(
        &self,
        name: &str,
        recycle: Duration,
        from_peer: bool,
    ) -> Result<()> {
        keys::validate_name(name)?;
        let mut lines = self.lines.write().await;
        if lines.contains_key(name) {
            return Err(Error::LineAlreadyExists {
                topic: self.name.clone(),
                line: name.to_string(),
            });
        }

        let start = *self.head.read().await;
        let line = Arc::new(Line::new(name, recycle, start));
        let recycle_text = format_duration(recycle);

        // Persist cursor and recycle before the line becomes visible.
        self.export_line(&line).await?;
        self.kv
            .set(
                &keys::recycle_key(&self.name, name),
                Bytes::from(recycle_text.clone()),
            )
            .await
            .map_err(Error::storage)?;

        lines.insert(name.to_string(), line);
        let names = lines.keys().cloned().collect();
        if let Err(e) = self.export_catalog_names(names).await {
            lines.remove(name);
            return Err(e);
        }
        drop(lines);

        if !from_peer {
            if let Err(e) = self
                .coordinator
                .register_line(&self.name, name, &recycle_text)
                .await
            {
                warn!(topic = %self.name, line = name, error = %e, "line registration failed");
            }
        }
        info!(topic = %self.name, line = name, recycle = %recycle_text, "line created");
        Ok(())
    }

    pub(crate) async fn remove_line(&self, name: &str, from_peer: bool) -> Result<()> {
        let mut lines = self.lines.write().await;
        let line = lines.remove(name).ok_or_else(|| Error::LineNotFound {
            topic: self.name.clone(),
            line: name.to_string(),
        })?;
        let names = lines.keys().cloned().collect();
        if let Err(e) = self.export_catalog_names(names).await {
            lines.insert(name.to_string(), line);
            return Err(e);
        }
        drop(lines);

        if !from_peer {
            if let Err(e) = self.coordinator.unregister_line(&self.name, name).await {
                warn!(topic = %self.name, line = name, error = %e, "line unregistration failed");
            }
        }

        // The line is already detached; now drop its persistent keys.
        self.kv
            .del(&keys::line_key(&self.name, name))
            .await
            .map_err(Error::storage)?;
        self.kv
            .del(&keys::recycle_key(&self.name, name))
            .await
            .map_err(Error::storage)?;
        info!(topic = %self.name, line = name, "line removed");
        Ok(())
    }

    pub(crate) async fn empty_line(&self, name: &str) -> Result<()> {
        let line = self.line(name).await?;
        line.reset().await;
        self.export_line(&line).await
    }

    /// Empty every line, then jump `head` to `tail` and delete the
    /// abandoned payload keys (they sit below the new head, where the
    /// reclamation pass never looks again).
    pub(crate) async fn empty(&self) -> Result<()> {
        let lines = self.lines.read().await;
        for line in lines.values() {
            line.reset().await;
            self.export_line(line).await?;
        }

        let mut head = self.head.write().await;
        let tail = self.tail.read().await;
        let old_head = *head;
        *head = *tail;
        if let Err(e) = self.export_head(*head).await {
            *head = old_head;
            return Err(e);
        }
        for id in old_head..*tail {
            if let Err(e) = self.kv.del(&keys::message_key(&self.name, id)).await {
                warn!(topic = %self.name, id, error = %e, "failed to delete emptied message");
            }
        }
        info!(topic = %self.name, "topic emptied");
        Ok(())
    }

    /// Tear the topic down: stop the worker, unregister and delete all
    /// lines, then purge anchors, catalog, and payloads. Storage errors
    /// here are logged and skipped so a half-removed topic still ends
    /// up detached.
    pub(crate) async fn remove(&self) {
        self.close().await;

        {
            let mut lines = self.lines.write().await;
            for line_name in lines.keys() {
                if let Err(e) = self.coordinator.unregister_line(&self.name, line_name).await {
                    warn!(topic = %self.name, line = %line_name, error = %e,
                          "line unregistration failed");
                }
                if let Err(e) = self.kv.del(&keys::line_key(&self.name, line_name)).await {
                    warn!(topic = %self.name, line = %line_name, error = %e,
                          "failed to delete line snapshot");
                }
                if let Err(e) = self.kv.del(&keys::recycle_key(&self.name, line_name)).await {
                    warn!(topic = %self.name, line = %line_name, error = %e,
                          "failed to delete line recycle");
                }
            }
            lines.clear();
        }

        let head = self.head.write().await;
        let tail = self.tail.read().await;
        for key in [
            keys::head_key(&self.name),
            keys::tail_key(&self.name),
            self.name.clone(),
        ] {
            if let Err(e) = self.kv.del(&key).await {
                warn!(topic = %self.name, key = %key, error = %e, "failed to delete topic key");
            }
        }
        for id in *head..*tail {
            if let Err(e) = self.kv.del(&keys::message_key(&self.name, id)).await {
                warn!(topic = %self.name, id, error = %e, "failed to delete message");
            }
        }
        info!(topic = %self.name, "topic removed from storage");
    }

    // -----------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------

    pub(crate) async fn stat(&self) -> TopicStat {
        let lines = self.lines.read().await;
        let head = *self.head.read().await;
        let tail = *self.tail.read().await;
        let mut line_stats = Vec::with_capacity(lines.len());
        for line in lines.values() {
            line_stats.push(line.stat(tail).await);
        }
        line_stats.sort_by(|a, b| a.name.cmp(&b.name));
        TopicStat {
            name: self.name.clone(),
            head,
            tail,
            count: tail.saturating_sub(head),
            lines: line_stats,
        }
    }

    pub(crate) async fn stat_line(&self, name: &str) -> Result<LineStat> {
        let line = self.line(name).await?;
        let tail = self.tail().await;
        Ok(line.stat(tail).await)
    }

    // -----------------------------------------------------------------
    // Background maintenance (called by the worker)
    // -----------------------------------------------------------------

    /// Snapshot every line cursor to storage. Failures are logged; the
    /// next backup tick retries.
    pub(crate) async fn export_lines(&self) {
        let lines = self.lines.read().await;
        for line in lines.values() {
            if let Err(e) = self.export_line(line).await {
                warn!(topic = %self.name, line = line.name(), error = %e,
                      "line snapshot failed");
            }
        }
    }

    /// One bounded reclamation pass: delete payloads every line is done
    /// with and advance the head anchor, stopping at the deadline, on
    /// shutdown, or on the first storage error.
    ///
    /// The frontier is computed before the head lock is taken (lock
    /// order is lines before head); frontiers only move forward, so a
    /// stale frontier is merely conservative.
    pub(crate) async fn clean(&self, shutdown: &watch::Receiver<bool>) {
        let end = self.reclaim_end().await;
        let mut head = self.head.write().await;
        let deadline = Instant::now() + self.config.clean_timeout;
        let start = *head;

        while *head < end {
            if *shutdown.borrow() {
                break;
            }
            if Instant::now() >= deadline {
                debug!(topic = %self.name, head = *head, "clean pass hit deadline");
                break;
            }
            let key = keys::message_key(&self.name, *head);
            if let Err(e) = self.kv.del(&key).await {
                warn!(topic = %self.name, key = %key, error = %e, "clean delete failed");
                break;
            }
            *head += 1;
            if let Err(e) = self.export_head(*head).await {
                warn!(topic = %self.name, error = %e, "clean head export failed");
                break;
            }
        }
        if *head > start {
            debug!(topic = %self.name, from = start, to = *head, "reclaimed storage");
        }
    }

    /// The reclamation frontier: nothing with no lines attached, else
    /// the minimum of every line's frontier, capped at the tail.
    async fn reclaim_end(&self) -> u64 {
        let lines = self.lines.read().await;
        if lines.is_empty() {
            return *self.head.read().await;
        }
        let mut end = *self.tail.read().await;
        for line in lines.values() {
            end = end.min(line.frontier().await);
        }
        end
    }

    // -----------------------------------------------------------------
    // Persistence plumbing
    // -----------------------------------------------------------------

    pub(crate) async fn export_line(&self, line: &Line) -> Result<()> {
        let snapshot = line.snapshot().await;
        self.kv
            .set(&keys::line_key(&self.name, line.name()), snapshot.encode())
            .await
            .map_err(Error::storage)
    }

    pub(crate) async fn export_catalog(&self) -> Result<()> {
        let names = self.lines.read().await.keys().cloned().collect();
        self.export_catalog_names(names).await
    }

    async fn export_catalog_names(&self, mut names: Vec<String>) -> Result<()> {
        names.sort();
        let catalog = TopicCatalog { lines: names };
        self.kv
            .set(&self.name, catalog.encode())
            .await
            .map_err(Error::storage)
    }

    async fn export_head(&self, head: u64) -> Result<()> {
        self.kv
            .set(&keys::head_key(&self.name), snapshot::encode_anchor(head))
            .await
            .map_err(Error::storage)
    }

    async fn export_tail(&self, tail: u64) -> Result<()> {
        self.kv
            .set(&keys::tail_key(&self.name), snapshot::encode_anchor(tail))
            .await
            .map_err(Error::storage)
    }

    /// `(line, recycle text)` pairs for coordinator registration after
    /// recovery.
    pub(crate) async fn line_registry(&self) -> Vec<(String, String)> {
        let lines = self.lines.read().await;
        lines
            .values()
            .map(|line| (line.name().to_string(), format_duration(line.recycle())))
            .collect()
    }

    /// Signal the worker and wait for it to exit. Idempotent.
    pub(crate) async fn close(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn line(&self, name: &str) -> Result<Arc<Line>> {
        self.lines
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::LineNotFound {
                topic: self.name.clone(),
                line: name.to_string(),
            })
    }
}
