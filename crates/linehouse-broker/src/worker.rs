//! Per-Topic Background Worker
//!
//! Each topic runs one worker task with two timers: a backup tick that
//! snapshots line cursors to storage, and a clean tick that runs a
//! bounded reclamation pass. The worker is the only mover of the topic
//! head outside of `empty` and `remove`, and it exits promptly on the
//! shutdown signal — the clean pass re-checks the signal between every
//! per-message deletion.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::topic::Topic;

pub(crate) struct TopicWorker {
    topic: Arc<Topic>,
    shutdown: watch::Receiver<bool>,
}

impl TopicWorker {
    pub(crate) fn new(topic: Arc<Topic>, shutdown: watch::Receiver<bool>) -> Self {
        Self { topic, shutdown }
    }

    /// Run until shutdown. Backup and clean failures are logged inside
    /// the topic; the next tick retries.
    pub(crate) async fn run(mut self) {
        let backup_period = self.topic.config().backup_interval;
        let clean_period = self.topic.config().clean_interval;

        let mut backup = interval_at(Instant::now() + backup_period, backup_period);
        backup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut clean = interval_at(Instant::now() + clean_period, clean_period);
        clean.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The clean pass takes its own receiver so it can poll the
        // signal between deletions while the select arm owns ours.
        let clean_shutdown = self.shutdown.clone();

        debug!(topic = %self.topic.name(), "background worker started");
        loop {
            tokio::select! {
                _ = backup.tick() => {
                    self.topic.export_lines().await;
                }
                _ = clean.tick() => {
                    self.topic.clean(&clean_shutdown).await;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(topic = %self.topic.name(), "background worker stopped");
    }
}
