//! Peer link contract
//!
//! A [`PeerLink`] is one connected endpoint. The transport behind it is not
//! this crate's concern: the hub only asks whether it is open or secure and
//! hands it already-built protocol messages. State changes travel back to the
//! hub through the [`PeerNotifier`] the hub installs on attach.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::SyncResult;
use crate::event::{Inbox, LocalEvent, PeerSignal};
use crate::protocol::ProtocolMessage;

/// Identifier of a peer within one hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// One connected endpoint
pub trait PeerLink {
    fn is_open(&self) -> bool;

    fn is_secure(&self) -> bool;

    /// Send one message to the remote end
    fn dispatch(&mut self, message: &ProtocolMessage) -> SyncResult<()>;

    /// Install or clear the hub back-reference
    fn set_notifier(&mut self, notifier: Option<PeerNotifier>);
}

/// Back-reference from a link to the hub that owns it
#[derive(Debug, Clone)]
pub struct PeerNotifier {
    peer: PeerId,
    inbox: Inbox,
}

impl PeerNotifier {
    pub(crate) fn new(peer: PeerId, inbox: Inbox) -> Self {
        Self { peer, inbox }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn disconnected(&self) {
        self.signal(PeerSignal::Disconnected);
    }

    pub fn secure_state_changed(&self, secure: bool) {
        self.signal(PeerSignal::SecureStateChanged(secure));
    }

    pub fn lag_updated(&self, lag: Duration) {
        self.signal(PeerSignal::LagUpdated(lag));
    }

    fn signal(&self, signal: PeerSignal) {
        if self
            .inbox
            .send(LocalEvent::Peer {
                peer: self.peer,
                signal,
            })
            .is_err()
        {
            trace!(peer = %self.peer, ?signal, "Hub gone, dropping peer signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_notifier_sends_signals() {
        let (inbox, mut rx) = mpsc::unbounded_channel();
        let notifier = PeerNotifier::new(PeerId(3), inbox);

        notifier.secure_state_changed(true);
        notifier.lag_updated(Duration::from_millis(40));
        notifier.disconnected();

        let signals: Vec<PeerSignal> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|ev| match ev {
                LocalEvent::Peer { peer, signal } => {
                    assert_eq!(peer, PeerId(3));
                    signal
                }
                other => panic!("unexpected event {:?}", other),
            })
            .collect();

        assert_eq!(
            signals,
            vec![
                PeerSignal::SecureStateChanged(true),
                PeerSignal::LagUpdated(Duration::from_millis(40)),
                PeerSignal::Disconnected,
            ]
        );
    }

    #[test]
    fn test_notifier_tolerates_closed_hub() {
        let (inbox, rx) = mpsc::unbounded_channel();
        drop(rx);
        PeerNotifier::new(PeerId(1), inbox).disconnected();
    }

    #[test]
    fn test_peer_id_display() {
        assert_eq!(PeerId(7).to_string(), "peer#7");
    }
}
