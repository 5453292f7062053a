//! In-process peer links
//!
//! [`MemoryLink::pair`] returns two connected ends. Each end's link encodes
//! outbound messages with postcard and pushes the frame to the other end's
//! receiver, the way a socket wrapper would write to the wire.
//!
//! ```text
//!   hub A                                            hub B
//!   add_peer(a.link) ── dispatch ──► frames ──► b.frames ── receive(peer, bytes)
//!   a.frames ◄── frames ◄── dispatch ── add_peer(b.link)
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::error::{SyncError, SyncResult};
use crate::peer::{PeerLink, PeerNotifier};
use crate::protocol::ProtocolMessage;

/// One side of an in-process connection
#[derive(Debug)]
pub struct MemoryLink {
    open: bool,
    secure: bool,
    lag: Duration,
    outbound: UnboundedSender<Vec<u8>>,
    notifier: Option<PeerNotifier>,
    sent: u64,
}

/// A link plus the frames the remote side sent to it
pub struct MemoryEnd {
    pub link: Rc<RefCell<MemoryLink>>,
    pub frames: UnboundedReceiver<Vec<u8>>,
}

impl MemoryLink {
    /// Two connected, open, insecure ends
    pub fn pair() -> (MemoryEnd, MemoryEnd) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = MemoryEnd {
            link: Rc::new(RefCell::new(MemoryLink::new(b_tx))),
            frames: a_rx,
        };
        let b = MemoryEnd {
            link: Rc::new(RefCell::new(MemoryLink::new(a_tx))),
            frames: b_rx,
        };
        (a, b)
    }

    fn new(outbound: UnboundedSender<Vec<u8>>) -> Self {
        Self {
            open: true,
            secure: false,
            lag: Duration::ZERO,
            outbound,
            notifier: None,
            sent: 0,
        }
    }

    /// Close the link and tell the owning hub
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Some(notifier) = &self.notifier {
            notifier.disconnected();
        }
    }

    /// Close the link without notifying, as a dead socket would
    pub fn mark_closed(&mut self) {
        self.open = false;
    }

    pub fn set_secure(&mut self, secure: bool) {
        if self.secure == secure {
            return;
        }
        self.secure = secure;
        if let Some(notifier) = &self.notifier {
            notifier.secure_state_changed(secure);
        }
    }

    /// Record a new lag measurement
    pub fn set_lag(&mut self, lag: Duration) {
        self.lag = lag;
        if let Some(notifier) = &self.notifier {
            notifier.lag_updated(lag);
        }
    }

    pub fn lag(&self) -> Duration {
        self.lag
    }

    pub fn notifier(&self) -> Option<&PeerNotifier> {
        self.notifier.as_ref()
    }

    /// Number of frames sent so far
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl PeerLink for MemoryLink {
    fn is_open(&self) -> bool {
        self.open
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn dispatch(&mut self, message: &ProtocolMessage) -> SyncResult<()> {
        if !self.open {
            return Err(SyncError::PeerClosed);
        }
        let frame = message.encode()?;
        trace!(kind = message.kind(), len = frame.len(), "Writing frame");
        if self.outbound.send(frame).is_err() {
            self.open = false;
            return Err(SyncError::PeerClosed);
        }
        self.sent += 1;
        Ok(())
    }

    fn set_notifier(&mut self, notifier: Option<PeerNotifier>) {
        self.notifier = notifier;
    }
}
