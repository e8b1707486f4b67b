//! Cluster Heartbeat Task
//!
//! Announces the broker's address to the coordinator on a fixed cadence
//! so peers and monitoring can tell the broker is alive. Announcement
//! failures never affect queue operations; they are logged and the next
//! beat retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, warn};

use linehouse_cluster::Coordinator;

pub(crate) struct HeartbeatTask {
    coordinator: Arc<dyn Coordinator>,
    addr: String,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl HeartbeatTask {
    pub(crate) fn new(
        coordinator: Arc<dyn Coordinator>,
        addr: String,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            coordinator,
            addr,
            interval,
            shutdown,
        }
    }

    /// Run until shutdown. Announces once immediately so peers learn
    /// the address without waiting a full interval.
    pub(crate) async fn run(mut self) {
        let mut failures: u64 = 0;
        self.beat(&mut failures).await;

        loop {
            tokio::select! {
                _ = sleep(self.interval) => {
                    self.beat(&mut failures).await;
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(addr = %self.addr, "heartbeat task stopped");
    }

    async fn beat(&self, failures: &mut u64) {
        match self.coordinator.announce(&self.addr).await {
            Ok(()) => {
                *failures = 0;
            }
            Err(e) => {
                *failures += 1;
                warn!(addr = %self.addr, error = %e, failures = *failures,
                      "heartbeat failed");
            }
        }
    }
}
