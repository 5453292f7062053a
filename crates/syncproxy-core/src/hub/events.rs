//! Hub notifications and statistics
//!
//! ```text
//! HubEvent
//! ├── Connected                   first peer attached
//! ├── Disconnected                last peer removed
//! ├── PeerRemoved(id)
//! ├── ObjectInitialized{..}       object state is usable
//! ├── SecureStateChanged(bool)    AND of all peer secure flags
//! ├── HeartbeatIntervalChanged
//! ├── MaxMissedHeartbeatsChanged
//! └── LagUpdated                  client mode only
//! ```

use std::fmt;
use std::time::Duration;

use super::ProxyMode;
use crate::peer::PeerId;

/// Notification broadcast by a hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Connected,
    Disconnected,
    PeerRemoved(PeerId),
    ObjectInitialized {
        class_name: String,
        object_name: String,
    },
    SecureStateChanged(bool),
    HeartbeatIntervalChanged(Duration),
    MaxMissedHeartbeatsChanged(u32),
    LagUpdated(Duration),
}

impl HubEvent {
    /// Short label used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            HubEvent::Connected => "connected",
            HubEvent::Disconnected => "disconnected",
            HubEvent::PeerRemoved(_) => "peer_removed",
            HubEvent::ObjectInitialized { .. } => "object_initialized",
            HubEvent::SecureStateChanged(_) => "secure_state_changed",
            HubEvent::HeartbeatIntervalChanged(_) => "heartbeat_interval_changed",
            HubEvent::MaxMissedHeartbeatsChanged(_) => "max_missed_heartbeats_changed",
            HubEvent::LagUpdated(_) => "lag_updated",
        }
    }
}

/// Snapshot of a hub's tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStats {
    pub mode: ProxyMode,
    pub peers: usize,
    pub secure: bool,
    pub relay_slots: usize,
    /// Receiver entries summed over all wire names
    pub receivers: usize,
    pub wire_names: usize,
    pub synchronized_objects: usize,
    pub classes: usize,
    /// Catalogs built process-wide
    pub cached_catalogs: usize,
}

impl fmt::Display for HubStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} hub with {} peer(s), secure: {}", self.mode, self.peers, self.secure)?;
        writeln!(f, "  relay slots:          {}", self.relay_slots)?;
        writeln!(
            f,
            "  receivers:            {} on {} wire name(s)",
            self.receivers, self.wire_names
        )?;
        writeln!(
            f,
            "  synchronized objects: {} in {} class(es)",
            self.synchronized_objects, self.classes
        )?;
        write!(f, "  cached catalogs:      {}", self.cached_catalogs)
    }
}
