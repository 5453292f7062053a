//! Hub configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ProxyMode;
use crate::error::{SyncError, SyncResult};

/// Default interval between heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of heartbeats a peer may miss before it is considered lost
pub const DEFAULT_MAX_MISSED_HEARTBEATS: u32 = 2;

/// Default capacity of the hub notification channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Settings for one [`SyncHub`](super::SyncHub)
///
/// Loadable from JSON; every field is optional:
///
/// ```json
/// { "mode": "server", "heartbeat_interval_ms": 5000, "max_missed_heartbeats": 3 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub mode: ProxyMode,
    #[serde(rename = "heartbeat_interval_ms", with = "millis")]
    pub heartbeat_interval: Duration,
    pub max_missed_heartbeats: u32,
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mode: ProxyMode::Client,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_missed_heartbeats: DEFAULT_MAX_MISSED_HEARTBEATS,
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl HubConfig {
    pub fn new(mode: ProxyMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_max_missed_heartbeats(mut self, count: u32) -> Self {
        self.max_missed_heartbeats = count;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        let config: HubConfig =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    fn validate(&self) -> SyncResult<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(SyncError::Config("heartbeat interval must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::Config("event capacity must be positive".into()));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
