//! Local event emission
//!
//! Objects own an [`EventEmitter`]. Emitting pushes a [`RaisedEvent`] into
//! every connected hub inbox and to every local observer:
//!
//! ```text
//! Settings::set_volume(5)
//!   └── emitter.emit("valueChanged", [5])
//!         ├── LocalEvent::Raised ──► hub inbox ──► EventRelay ──► RpcCall
//!         └── RaisedEvent ────────► observers (UI, tests)
//! ```
//!
//! Dropping the emitter sends [`LocalEvent::SourceDropped`] so hubs can
//! detach the relay slots of a source that no longer exists.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::object::OutboundCall;
use crate::peer::PeerId;
use crate::value::Value;

/// Process-unique identity of an event source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SourceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// An event raised by a local object
#[derive(Debug, Clone, PartialEq)]
pub struct RaisedEvent {
    pub source: SourceId,
    /// Event name without parameter list
    pub event: String,
    pub args: Vec<Value>,
}

/// Notification from a peer link to its hub
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PeerSignal {
    Disconnected,
    SecureStateChanged(bool),
    LagUpdated(Duration),
}

/// Everything a hub receives through its inbox
#[derive(Debug)]
pub enum LocalEvent {
    Raised(RaisedEvent),
    SourceDropped(SourceId),
    SyncCall(OutboundCall),
    Peer { peer: PeerId, signal: PeerSignal },
}

/// Sending half of a hub inbox
pub type Inbox = UnboundedSender<LocalEvent>;

/// Emits events from one local object
///
/// Not `Clone`: the emitter's identity is the object's identity.
pub struct EventEmitter {
    id: SourceId,
    relays: RefCell<Vec<Inbox>>,
    observers: RefCell<Vec<UnboundedSender<RaisedEvent>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            id: SourceId::next(),
            relays: RefCell::new(Vec::new()),
            observers: RefCell::new(Vec::new()),
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Route emissions into a hub inbox; connecting the same inbox twice is a no-op
    pub fn connect(&self, inbox: &Inbox) {
        let mut relays = self.relays.borrow_mut();
        if !relays.iter().any(|r| r.same_channel(inbox)) {
            relays.push(inbox.clone());
        }
    }

    /// Stop routing emissions into a hub inbox
    pub fn disconnect(&self, inbox: &Inbox) {
        self.relays.borrow_mut().retain(|r| !r.same_channel(inbox));
    }

    /// Subscribe to every event this object raises
    pub fn observe(&self) -> UnboundedReceiver<RaisedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.borrow_mut().push(tx);
        rx
    }

    /// Raise an event
    pub fn emit(&self, event: &str, args: Vec<Value>) {
        let raised = RaisedEvent {
            source: self.id,
            event: event.to_string(),
            args,
        };

        self.relays
            .borrow_mut()
            .retain(|inbox| inbox.send(LocalEvent::Raised(raised.clone())).is_ok());
        self.observers
            .borrow_mut()
            .retain(|tx| tx.send(raised.clone()).is_ok());
    }

    pub fn relay_count(&self) -> usize {
        self.relays.borrow().len()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("id", &self.id)
            .field("relays", &self.relays.borrow().len())
            .field("observers", &self.observers.borrow().len())
            .finish()
    }
}

impl Drop for EventEmitter {
    fn drop(&mut self) {
        for inbox in self.relays.get_mut().drain(..) {
            let _ = inbox.send(LocalEvent::SourceDropped(self.id));
        }
    }
}
