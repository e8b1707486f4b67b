//! In-Memory Coordinator
//!
//! Fans registrations out to every watcher over a broadcast channel.
//! Used by tests and by embedded multi-broker setups that share one
//! process. Note the echo: a broker that registers a topic also sees
//! its own `TopicCreated` come back through `watch` — the same thing a
//! real coordination service does — so brokers must tolerate applying
//! events for entities they already own.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::debug;

use crate::{ClusterEvent, Coordinator, Result};

const EVENT_BUFFER: usize = 64;

/// In-process coordinator with broadcast watch semantics.
#[derive(Debug)]
pub struct MemoryCoordinator {
    events: broadcast::Sender<ClusterEvent>,
    registry: Mutex<Registry>,
}

#[derive(Debug, Default)]
struct Registry {
    /// Every address heard via `announce`, in arrival order.
    announcements: Vec<String>,
    /// topic → line → recycle text.
    topics: HashMap<String, HashMap<String, String>>,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            events,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Inject an event as if a peer had registered it. Test helper.
    pub fn publish(&self, event: ClusterEvent) {
        let _ = self.events.send(event);
    }

    /// Registered topic names, sorted. Test helper.
    pub async fn topics(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut names: Vec<String> = registry.topics.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered `(topic, line, recycle)` triples, sorted. Test helper.
    pub async fn lines(&self) -> Vec<(String, String, String)> {
        let registry = self.registry.lock().await;
        let mut lines: Vec<(String, String, String)> = registry
            .topics
            .iter()
            .flat_map(|(topic, lines)| {
                lines
                    .iter()
                    .map(|(line, recycle)| (topic.clone(), line.clone(), recycle.clone()))
            })
            .collect();
        lines.sort();
        lines
    }

    /// Addresses seen via `announce`, in order. Test helper.
    pub async fn announcements(&self) -> Vec<String> {
        self.registry.lock().await.announcements.clone()
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn announce(&self, addr: &str) -> Result<()> {
        self.registry
            .lock()
            .await
            .announcements
            .push(addr.to_string());
        Ok(())
    }

    async fn register_topic(&self, topic: &str) -> Result<()> {
        self.registry
            .lock()
            .await
            .topics
            .entry(topic.to_string())
            .or_default();
        let _ = self.events.send(ClusterEvent::TopicCreated {
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn register_line(&self, topic: &str, line: &str, recycle: &str) -> Result<()> {
        self.registry
            .lock()
            .await
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(line.to_string(), recycle.to_string());
        let _ = self.events.send(ClusterEvent::LineCreated {
            topic: topic.to_string(),
            line: line.to_string(),
            recycle: recycle.to_string(),
        });
        Ok(())
    }

    async fn unregister_line(&self, topic: &str, line: &str) -> Result<()> {
        if let Some(lines) = self.registry.lock().await.topics.get_mut(topic) {
            lines.remove(line);
        }
        let _ = self.events.send(ClusterEvent::LineRemoved {
            topic: topic.to_string(),
            line: line.to_string(),
        });
        Ok(())
    }

    async fn watch(&self) -> Result<mpsc::Receiver<ClusterEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut source = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "watcher lagged behind cluster events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}
