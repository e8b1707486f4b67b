//! Broker: the top-level topic registry and request router
//!
//! The broker owns every topic, routes string-keyed requests
//! (`topic`, `topic/line`, `topic/line/id`) to the right entity,
//! rebuilds the catalog from storage at startup, and quiesces
//! everything at shutdown. It also drives the two cluster tasks: the
//! address heartbeat and the peer-event watch loop that mirrors topics
//! and lines announced by other brokers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use linehouse_cluster::{ClusterEvent, Coordinator};
use linehouse_core::keys::{self, RequestKey};
use linehouse_core::snapshot::BrokerCatalog;
use linehouse_core::{parse_duration, Error, Result};
use linehouse_kv::KvStore;

use crate::config::BrokerConfig;
use crate::heartbeat::HeartbeatTask;
use crate::stats::QueueStat;
use crate::topic::Topic;

/// A persistent topic/line message queue broker.
pub struct Broker {
    kv: Arc<dyn KvStore>,
    coordinator: Arc<dyn Coordinator>,
    config: BrokerConfig,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Broker {
    /// Open a broker over a storage backend: recover every persisted
    /// topic and line, then start the cluster tasks.
    pub async fn open(
        kv: Arc<dyn KvStore>,
        coordinator: Arc<dyn Coordinator>,
        config: BrokerConfig,
    ) -> Result<Arc<Self>> {
        let (shutdown_tx, _) = watch::channel(false);
        let broker = Arc::new(Self {
            kv,
            coordinator,
            config,
            topics: RwLock::new(HashMap::new()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });
        broker.load().await?;
        broker.start_cluster_tasks().await;
        info!(addr = %broker.config.self_addr, "broker started");
        Ok(broker)
    }

    // -----------------------------------------------------------------
    // Request surface
    // -----------------------------------------------------------------

    /// Create a topic (`topic`) or a line (`topic/line` plus recycle).
    /// A missing recycle means auto-ack.
    pub async fn create(&self, key: &str, recycle: Option<Duration>) -> Result<()> {
        match RequestKey::parse(key)? {
            RequestKey::Topic(name) => self.create_topic(&name, false).await,
            RequestKey::Line { topic, line } => {
                self.topic(&topic)
                    .await?
                    .create_line(&line, recycle.unwrap_or(Duration::ZERO), false)
                    .await
            }
            RequestKey::Message { .. } => {
                Err(Error::BadKey("create does not take a message id".to_string()))
            }
        }
    }

    /// Append one message to a topic.
    pub async fn push(&self, topic: &str, data: Bytes) -> Result<()> {
        self.topic(topic).await?.push(data).await
    }

    /// Append a batch to a topic; all-or-nothing as seen by readers.
    pub async fn push_many(&self, topic: &str, batch: Vec<Bytes>) -> Result<()> {
        self.topic(topic).await?.push_many(batch).await
    }

    /// Deliver one message from a line (`topic/line`). `Ok(None)` means
    /// the line is currently drained.
    pub async fn pop(&self, key: &str) -> Result<Option<(u64, Bytes)>> {
        let (topic, line) = Self::line_key(key)?;
        self.topic(&topic).await?.pop(&line).await
    }

    /// Deliver up to `n` messages from a line; a short batch is not an
    /// error.
    pub async fn pop_many(&self, key: &str, n: usize) -> Result<Vec<(u64, Bytes)>> {
        let (topic, line) = Self::line_key(key)?;
        self.topic(&topic).await?.pop_many(&line, n).await
    }

    /// Confirm one delivery (`topic/line/id`).
    pub async fn confirm(&self, key: &str) -> Result<()> {
        match RequestKey::parse(key)? {
            RequestKey::Message { topic, line, id } => {
                self.topic(&topic).await?.confirm(&line, id).await
            }
            _ => Err(Error::BadKey(format!("confirm needs topic/line/id, got {key:?}"))),
        }
    }

    /// Confirm a batch of deliveries on a line; returns how many
    /// succeeded.
    pub async fn confirm_many(&self, key: &str, ids: &[u64]) -> Result<usize> {
        let (topic, line) = Self::line_key(key)?;
        self.topic(&topic).await?.confirm_many(&line, ids).await
    }

    /// Drop pending state: a line's delivery bookkeeping, or a whole
    /// topic (every line plus the retained log).
    pub async fn empty(&self, key: &str) -> Result<()> {
        match RequestKey::parse(key)? {
            RequestKey::Topic(name) => self.topic(&name).await?.empty().await,
            RequestKey::Line { topic, line } => {
                self.topic(&topic).await?.empty_line(&line).await
            }
            RequestKey::Message { .. } => {
                Err(Error::BadKey("empty does not take a message id".to_string()))
            }
        }
    }

    /// Remove a line or an entire topic, including persisted state.
    pub async fn remove(&self, key: &str) -> Result<()> {
        match RequestKey::parse(key)? {
            RequestKey::Topic(name) => self.remove_topic(&name).await,
            RequestKey::Line { topic, line } => {
                self.topic(&topic).await?.remove_line(&line, false).await
            }
            RequestKey::Message { .. } => {
                Err(Error::BadKey("remove does not take a message id".to_string()))
            }
        }
    }

    /// Structured stats for a topic or a line.
    pub async fn stat(&self, key: &str) -> Result<QueueStat> {
        match RequestKey::parse(key)? {
            RequestKey::Topic(name) => Ok(QueueStat::Topic(self.topic(&name).await?.stat().await)),
            RequestKey::Line { topic, line } => Ok(QueueStat::Line(
                self.topic(&topic).await?.stat_line(&line).await?,
            )),
            RequestKey::Message { .. } => {
                Err(Error::BadKey("stat does not take a message id".to_string()))
            }
        }
    }

    /// Quiesce and persist everything: stop cluster tasks and topic
    /// workers, snapshot every line and catalog, close the backend.
    pub async fn close(&self) {
        info!("broker stopping");
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let topics: Vec<Arc<Topic>> = self.topics.read().await.values().cloned().collect();
        for topic in &topics {
            topic.close().await;
        }
        for topic in &topics {
            topic.export_lines().await;
            if let Err(e) = topic.export_catalog().await {
                warn!(topic = topic.name(), error = %e, "catalog export failed at shutdown");
            }
        }

        if let Err(e) = self.kv.close().await {
            warn!(error = %e, "storage close failed");
        }
        info!("broker stopped");
    }

    // -----------------------------------------------------------------
    // Topic registry
    // -----------------------------------------------------------------

    async fn create_topic(&self, name: &str, from_peer: bool) -> Result<()> {
        keys::validate_name(name)?;
        if self.topics.read().await.contains_key(name) {
            return Err(Error::TopicAlreadyExists(name.to_string()));
        }

        let topic = Topic::create(
            name,
            Arc::clone(&self.kv),
            Arc::clone(&self.coordinator),
            self.config.clone(),
        )
        .await?;

        {
            let mut topics = self.topics.write().await;
            if topics.contains_key(name) {
                // Lost a creation race; discard the duplicate.
                topic.close().await;
                return Err(Error::TopicAlreadyExists(name.to_string()));
            }
            topics.insert(name.to_string(), Arc::clone(&topic));
        }

        if let Err(e) = self.export_catalog().await {
            self.topics.write().await.remove(name);
            topic.close().await;
            return Err(e);
        }

        if !from_peer {
            if let Err(e) = self.coordinator.register_topic(name).await {
                warn!(topic = name, error = %e, "topic registration failed");
            }
        }
        info!(topic = name, "topic created");
        Ok(())
    }

    async fn remove_topic(&self, name: &str) -> Result<()> {
        let topic = {
            let mut topics = self.topics.write().await;
            topics
                .remove(name)
                .ok_or_else(|| Error::TopicNotFound(name.to_string()))?
        };
        if let Err(e) = self.export_catalog().await {
            self.topics
                .write()
                .await
                .insert(name.to_string(), topic);
            return Err(e);
        }
        topic.remove().await;
        info!(topic = name, "topic removed");
        Ok(())
    }

    async fn topic(&self, name: &str) -> Result<Arc<Topic>> {
        self.topics
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TopicNotFound(name.to_string()))
    }

    async fn export_catalog(&self) -> Result<()> {
        let mut names: Vec<String> = self.topics.read().await.keys().cloned().collect();
        names.sort();
        let catalog = BrokerCatalog { topics: names };
        self.kv
            .set(keys::BROKER_CATALOG_KEY, catalog.encode())
            .await
            .map_err(Error::storage)
    }

    // -----------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------

    async fn load(&self) -> Result<()> {
        let data = match self.kv.get(keys::BROKER_CATALOG_KEY).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                info!("no broker catalog in storage, starting empty");
                return Ok(());
            }
            Err(e) => return Err(Error::storage(e)),
        };
        let catalog = match BrokerCatalog::decode(&data) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "broker catalog unreadable, starting empty");
                return Ok(());
            }
        };

        for name in &catalog.topics {
            match Topic::load(
                name,
                Arc::clone(&self.kv),
                Arc::clone(&self.coordinator),
                self.config.clone(),
            )
            .await
            {
                Ok(topic) => {
                    if let Err(e) = self.coordinator.register_topic(name).await {
                        warn!(topic = %name, error = %e, "topic registration failed");
                    }
                    for (line, recycle) in topic.line_registry().await {
                        if let Err(e) = self
                            .coordinator
                            .register_line(name, &line, &recycle)
                            .await
                        {
                            warn!(topic = %name, line = %line, error = %e,
                                  "line registration failed");
                        }
                    }
                    self.topics.write().await.insert(name.clone(), topic);
                }
                Err(e) => {
                    warn!(topic = %name, error = %e, "skipping topic during recovery");
                }
            }
        }

        let loaded = self.topics.read().await.len();
        info!(topics = loaded, "recovery finished");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Cluster plumbing
    // -----------------------------------------------------------------

    async fn start_cluster_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;

        let heartbeat = HeartbeatTask::new(
            Arc::clone(&self.coordinator),
            self.config.self_addr.clone(),
            self.config.heartbeat_interval,
            self.shutdown_tx.subscribe(),
        );
        tasks.push(tokio::spawn(heartbeat.run()));

        match self.coordinator.watch().await {
            Ok(mut events) => {
                let broker = Arc::clone(self);
                let mut shutdown = self.shutdown_tx.subscribe();
                tasks.push(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            event = events.recv() => match event {
                                Some(event) => broker.apply_cluster_event(event).await,
                                None => break,
                            },
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                        }
                    }
                    debug!("cluster watch loop stopped");
                }));
            }
            Err(e) => warn!(error = %e, "coordinator watch unavailable"),
        }
    }

    /// Mirror a peer announcement locally. Applying our own echoed
    /// registration is a no-op ("already exists" is expected), so
    /// failures here are debug-level only.
    async fn apply_cluster_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::TopicCreated { topic } => {
                if let Err(e) = self.create_topic(&topic, true).await {
                    debug!(topic = %topic, error = %e, "peer topic not applied");
                }
            }
            ClusterEvent::LineCreated {
                topic,
                line,
                recycle,
            } => {
                let recycle = match parse_duration(&recycle) {
                    Ok(duration) => duration,
                    Err(e) => {
                        warn!(topic = %topic, line = %line, error = %e,
                              "peer line has unreadable recycle");
                        return;
                    }
                };
                // The peer may announce a line before we ever saw its
                // topic.
                if self.topic(&topic).await.is_err() {
                    if let Err(e) = self.create_topic(&topic, true).await {
                        debug!(topic = %topic, error = %e, "peer topic not applied");
                    }
                }
                match self.topic(&topic).await {
                    Ok(t) => {
                        if let Err(e) = t.create_line(&line, recycle, true).await {
                            debug!(topic = %topic, line = %line, error = %e,
                                   "peer line not applied");
                        }
                    }
                    Err(e) => {
                        debug!(topic = %topic, line = %line, error = %e,
                               "peer line not applied");
                    }
                }
            }
            ClusterEvent::LineRemoved { topic, line } => {
                if let Ok(t) = self.topic(&topic).await {
                    if let Err(e) = t.remove_line(&line, true).await {
                        debug!(topic = %topic, line = %line, error = %e,
                               "peer line removal not applied");
                    }
                }
            }
        }
    }

    fn line_key(key: &str) -> Result<(String, String)> {
        match RequestKey::parse(key)? {
            RequestKey::Line { topic, line } => Ok((topic, line)),
            _ => Err(Error::BadKey(format!("expected topic/line, got {key:?}"))),
        }
    }
}
