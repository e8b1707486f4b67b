//! Broker Configuration
//!
//! Timer cadences for the per-topic background worker and the cluster
//! heartbeat, plus the address announced to the coordinator. Durations
//! serialize as integer milliseconds so configs stay flat and explicit.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::Broker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// How often each topic snapshots its line cursors to storage.
    #[serde(with = "duration_ms")]
    pub backup_interval: Duration,

    /// How often each topic runs a storage reclamation pass.
    #[serde(with = "duration_ms")]
    pub clean_interval: Duration,

    /// Upper bound on a single reclamation pass; keeps shutdown latency
    /// bounded by roughly one storage operation.
    #[serde(with = "duration_ms")]
    pub clean_timeout: Duration,

    /// How often the broker announces its address to the coordinator.
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,

    /// Address announced to the coordinator.
    pub self_addr: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backup_interval: Duration::from_secs(10),
            clean_interval: Duration::from_secs(20),
            clean_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            self_addr: "127.0.0.1:8808".to_string(),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
