//! Line: an independent consumer cursor over a topic
//!
//! A line tracks three things under one lock:
//!
//! - `head`: the next topic id this line will deliver
//! - `ihead`: the lowest id not yet confirmed — everything below it is
//!   done, so `ihead` is what the line contributes to topic-level
//!   storage reclamation
//! - the in-flight window `[ihead, head)`: an ordered queue of
//!   outstanding deliveries (front expires first) plus a membership map
//!   recording, for every id in the window, whether it is still
//!   awaiting confirmation (`true`) or was confirmed out of order and
//!   is waiting for `ihead` to sweep past it (`false`)
//!
//! A line with a zero recycle timeout auto-acks: delivery advances both
//! cursors and nothing is tracked. A non-zero recycle is a visibility
//! timeout — un-confirmed deliveries are re-queued once their expiry
//! passes, giving at-least-once semantics.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::debug;

use linehouse_core::snapshot::{InflightEntry, LineSnapshot};
use linehouse_core::{Error, Result};

use crate::stats::LineStat;
use crate::topic::Topic;

/// One outstanding delivery.
#[derive(Debug, Clone)]
struct Inflight {
    tid: u64,
    expire: Instant,
}

#[derive(Debug)]
struct LineState {
    head: u64,
    ihead: u64,
    /// Outstanding deliveries, front expires first.
    inflight: VecDeque<Inflight>,
    /// id → currently in flight? Domain is exactly `[ihead, head)`.
    imap: HashMap<u64, bool>,
}

/// A consumer cursor attached to a topic.
#[derive(Debug)]
pub(crate) struct Line {
    name: String,
    recycle: Duration,
    state: RwLock<LineState>,
}

impl Line {
    /// New line starting at the topic's current head.
    pub(crate) fn new(name: &str, recycle: Duration, start: u64) -> Self {
        Self {
            name: name.to_string(),
            recycle,
            state: RwLock::new(LineState {
                head: start,
                ihead: start,
                inflight: VecDeque::new(),
                imap: HashMap::new(),
            }),
        }
    }

    /// Rebuild a line from its persisted snapshot.
    ///
    /// Snapshots are per-line and not atomic with the topic anchors, so
    /// a crash can leave a cursor claiming ids the topic never
    /// acknowledged writing (snapshot ahead of the tail) or ids the
    /// clean pass already reclaimed (snapshot behind the head). Both
    /// cursors are clamped into `[topic_head, topic_tail]` and
    /// in-flight records outside the clamped window are dropped: ids
    /// above the tail count as undelivered, ids below the head are gone
    /// from storage and count as done.
    pub(crate) fn restore(
        name: &str,
        recycle: Duration,
        snapshot: &LineSnapshot,
        topic_head: u64,
        topic_tail: u64,
    ) -> Self {
        let head = snapshot.head.min(topic_tail).max(topic_head);
        let ihead = snapshot.ihead.max(topic_head).min(head);

        let mut imap: HashMap<u64, bool> = (ihead..head).map(|id| (id, false)).collect();
        let mut inflight = VecDeque::with_capacity(snapshot.inflight.len());
        let now = Instant::now();
        let now_ms = unix_millis();
        for entry in &snapshot.inflight {
            if entry.tid < ihead || entry.tid >= head {
                continue;
            }
            let remaining = Duration::from_millis(entry.expire_at_ms.saturating_sub(now_ms));
            inflight.push_back(Inflight {
                tid: entry.tid,
                expire: now + remaining,
            });
            imap.insert(entry.tid, true);
        }

        Self {
            name: name.to_string(),
            recycle,
            state: RwLock::new(LineState {
                head,
                ihead,
                inflight,
                imap,
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn recycle(&self) -> Duration {
        self.recycle
    }

    /// Deliver one message: an expired in-flight record first
    /// (redelivery), otherwise the message at `head`. `Ok(None)` means
    /// the line is drained.
    pub(crate) async fn pop(&self, topic: &Topic) -> Result<Option<(u64, Bytes)>> {
        let mut state = self.state.write().await;
        let now = Instant::now();

        // Visibility timeout: the front of the in-flight queue is the
        // oldest delivery; if it has expired, hand it out again and
        // push its expiry back.
        if !self.recycle.is_zero() {
            let expired = state
                .inflight
                .front()
                .filter(|record| record.expire <= now)
                .map(|record| record.tid);
            if let Some(tid) = expired {
                let data = topic.fetch_message(tid).await?;
                if let Some(mut record) = state.inflight.pop_front() {
                    record.expire = now + self.recycle;
                    state.inflight.push_back(record);
                }
                debug!(line = %self.name, tid, "redelivering expired message");
                return Ok(Some((tid, data)));
            }
        }

        if state.head >= topic.tail().await {
            return Ok(None);
        }

        let id = state.head;
        let data = topic.fetch_message(id).await?;
        if self.recycle.is_zero() {
            // Auto-ack: nothing to confirm later.
            state.head = id + 1;
            state.ihead = state.head;
        } else {
            state.inflight.push_back(Inflight {
                tid: id,
                expire: now + self.recycle,
            });
            state.imap.insert(id, true);
            state.head = id + 1;
        }
        Ok(Some((id, data)))
    }

    /// Deliver up to `n` messages; stops early when drained. A partial
    /// batch is a success.
    pub(crate) async fn pop_many(&self, topic: &Topic, n: usize) -> Result<Vec<(u64, Bytes)>> {
        let mut batch = Vec::new();
        for _ in 0..n {
            match self.pop(topic).await? {
                Some(message) => batch.push(message),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Confirm a delivered message and sweep `ihead` past every id that
    /// is no longer outstanding.
    pub(crate) async fn confirm(&self, id: u64) -> Result<()> {
        let mut state = self.state.write().await;
        if id < state.ihead || id >= state.head {
            return Err(Error::NotInFlight(format!(
                "id {id} outside window [{}, {})",
                state.ihead, state.head
            )));
        }
        if state.imap.get(&id) != Some(&true) {
            return Err(Error::NotInFlight(format!("id {id} already confirmed")));
        }

        state.inflight.retain(|record| record.tid != id);
        state.imap.insert(id, false);

        while state.ihead < state.head && state.imap.get(&state.ihead) == Some(&false) {
            let swept = state.ihead;
            state.imap.remove(&swept);
            state.ihead = swept + 1;
        }
        Ok(())
    }

    /// Confirm a batch; bad ids are skipped, the count of successes is
    /// returned.
    pub(crate) async fn confirm_many(&self, ids: &[u64]) -> usize {
        let mut confirmed = 0;
        for &id in ids {
            match self.confirm(id).await {
                Ok(()) => confirmed += 1,
                Err(e) => debug!(line = %self.name, id, error = %e, "confirm skipped"),
            }
        }
        confirmed
    }

    /// Drop all delivery bookkeeping: `ihead` jumps to `head`, nothing
    /// stays in flight.
    pub(crate) async fn reset(&self) {
        let mut state = self.state.write().await;
        state.ihead = state.head;
        state.inflight.clear();
        state.imap.clear();
    }

    /// This line's contribution to the topic's reclamation frontier:
    /// confirmed-up-to for tracking lines, delivered-up-to for auto-ack
    /// lines.
    pub(crate) async fn frontier(&self) -> u64 {
        let state = self.state.read().await;
        if self.recycle.is_zero() {
            state.head
        } else {
            state.ihead
        }
    }

    /// Cursor snapshot for persistence. Expiries are converted to
    /// absolute unix milliseconds so they survive a restart.
    pub(crate) async fn snapshot(&self) -> LineSnapshot {
        let state = self.state.read().await;
        let now = Instant::now();
        let now_ms = unix_millis();
        LineSnapshot {
            head: state.head,
            ihead: state.ihead,
            inflight: state
                .inflight
                .iter()
                .map(|record| InflightEntry {
                    tid: record.tid,
                    expire_at_ms: now_ms
                        + record.expire.saturating_duration_since(now).as_millis() as u64,
                })
                .collect(),
        }
    }

    pub(crate) async fn stat(&self, topic_tail: u64) -> LineStat {
        let state = self.state.read().await;
        LineStat {
            name: self.name.clone(),
            recycle: linehouse_core::format_duration(self.recycle),
            head: state.head,
            ihead: state.ihead,
            inflight: state.inflight.len(),
            pending: topic_tail.saturating_sub(state.head),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_millis() as u64
}
