//! syncproxy core library
//!
//! Object synchronization and remote method calls between a core process and
//! its clients.
//!
//! ## Overview
//!
//! A [`SyncHub`] runs on each side of a connection. Objects registered with
//! [`SyncHub::synchronize`] are addressed by class name and instance name;
//! their state is bootstrapped with an init handshake and kept in step by
//! method calls that travel as [`ProtocolMessage`]s.
//!
//! ## Core Principles
//!
//! - **No shared types on the wire**: both ends describe their types with a
//!   [`ClassDescriptor`]; calls are dispatched by name and checked against
//!   the declared argument types
//! - **Server owns the truth**: `request*` methods run on the server, every
//!   other method runs on clients
//! - **Single-threaded hubs**: all work happens in [`SyncHub::poll`] and
//!   [`SyncHub::receive`]; nothing blocks and nothing is locked
//!
//! ## Quick Start
//!
//! ```ignore
//! use syncproxy_core::{MemoryLink, ProxyMode, SyncHub};
//!
//! let mut core = SyncHub::new(ProxyMode::Server);
//! let mut client = SyncHub::new(ProxyMode::Client);
//!
//! let (core_end, client_end) = MemoryLink::pair();
//! let to_client = core.add_peer(core_end.link.clone())?;
//! let to_core = client.add_peer(client_end.link.clone())?;
//!
//! core.synchronize(&settings)?;          // initialized immediately
//! client.synchronize(&remote_settings)?; // sends InitRequest
//!
//! // Move frames across and let each hub run its loop
//! while let Ok(frame) = core_end.frames.try_recv() { core.receive(to_client, &frame); }
//! while let Ok(frame) = client_end.frames.try_recv() { client.receive(to_core, &frame); }
//! core.poll();
//! client.poll();
//! ```

pub mod catalog;
pub mod error;
pub mod event;
pub mod hub;
pub mod invoke;
pub mod link;
pub mod logging;
pub mod object;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod value;

// Re-exports
pub use catalog::{ClassDescriptor, EventDescriptor, MethodCatalog, MethodDecl, MethodDescriptor};
pub use error::{SyncError, SyncResult};
pub use event::{EventEmitter, LocalEvent, PeerSignal, RaisedEvent, SourceId};
pub use hub::{drive, HubConfig, HubEvent, HubStats, ProxyMode, SyncHub, OBJECT_RENAMED};
pub use invoke::invoke_slot;
pub use link::{MemoryEnd, MemoryLink};
pub use object::{EventSource, Reflect, SyncBinding, SyncCore, SyncableObject};
pub use peer::{PeerId, PeerLink, PeerNotifier};
pub use protocol::ProtocolMessage;
pub use relay::{EventRelay, SlotId};
pub use value::{PropertyMap, TypeTag, Value};
