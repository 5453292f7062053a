//! Synchronization hub
//!
//! A [`SyncHub`] is one endpoint of the synchronization layer. It owns the
//! peer set, the registry of synchronized objects, the event relay and the
//! receiver table, and runs in either [`ProxyMode::Server`] or
//! [`ProxyMode::Client`].
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                             SyncHub                               │
//! │                                                                   │
//! │  inbox (mpsc) ◄── EventEmitter (Raised / SourceDropped)           │
//! │       │      ◄── SyncCore::sync / request (SyncCall)              │
//! │       │      ◄── PeerNotifier (Disconnected / Secure / Lag)       │
//! │       ▼                                                           │
//! │  poll() ──► EventRelay ──► broadcast(RpcCall) ──► PeerLink*       │
//! │                                                                   │
//! │  receive(peer, bytes) ──► handle_message                          │
//! │       ├── Sync        ──► registry ──► MethodCatalog ──► invoke   │
//! │       ├── InitRequest ──► registry ──► InitData (to peer)         │
//! │       ├── InitData    ──► registry ──► apply + initialized        │
//! │       └── RpcCall     ──► receivers (subscription order)          │
//! │                                                                   │
//! │  events (broadcast) ──► HubEvent subscribers                      │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A hub is single-threaded: peers and objects are shared through
//! `Rc<RefCell<_>>`. Peer removal discovered while broadcasting and the
//! release of removed links are deferred to the next [`SyncHub::poll`].

mod config;
mod dispatch;
mod events;

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use config::{
    HubConfig, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_MISSED_HEARTBEATS, EVENT_CHANNEL_CAPACITY,
};
pub use events::{HubEvent, HubStats};

use crate::catalog::MethodCatalog;
use crate::error::{SyncError, SyncResult};
use crate::event::{Inbox, LocalEvent};
use crate::object::{EventSource, Reflect, SyncBinding, SyncableObject};
use crate::peer::{PeerId, PeerLink, PeerNotifier};
use crate::protocol::ProtocolMessage;
use crate::relay::{EventRelay, SlotId};
use crate::value::{normalize_signature, Value};

/// Wire name of the built-in call announcing a renamed object
pub const OBJECT_RENAMED: &str = "__objectRenamed__";

/// Role of a hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Owns the authoritative state; runs `request*` methods
    Server,
    /// Mirrors server state; at most one peer
    #[default]
    Client,
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyMode::Server => f.write_str("server"),
            ProxyMode::Client => f.write_str("client"),
        }
    }
}

struct RegistryEntry {
    object: Weak<RefCell<dyn SyncableObject>>,
    catalog: Arc<MethodCatalog>,
}

struct ReceiverEntry {
    receiver: Weak<RefCell<dyn Reflect>>,
    catalog: Arc<MethodCatalog>,
    method: usize,
}

enum DeferredAction {
    RemovePeer(PeerId),
    Release(Rc<RefCell<dyn PeerLink>>),
}

/// One endpoint of the synchronization layer
pub struct SyncHub {
    config: HubConfig,
    peers: BTreeMap<PeerId, Rc<RefCell<dyn PeerLink>>>,
    next_peer: u64,
    registry: HashMap<String, HashMap<String, RegistryEntry>>,
    relay: EventRelay,
    receivers: HashMap<String, Vec<ReceiverEntry>>,
    inbox_tx: Inbox,
    inbox_rx: mpsc::UnboundedReceiver<LocalEvent>,
    deferred: VecDeque<DeferredAction>,
    events: broadcast::Sender<HubEvent>,
    secure: bool,
}

impl SyncHub {
    pub fn new(mode: ProxyMode) -> Self {
        Self::with_config(HubConfig::new(mode))
    }

    pub fn with_config(config: HubConfig) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            peers: BTreeMap::new(),
            next_peer: 1,
            registry: HashMap::new(),
            relay: EventRelay::new(),
            receivers: HashMap::new(),
            inbox_tx,
            inbox_rx,
            deferred: VecDeque::new(),
            events,
            secure: false,
        }
    }

    /// Subscribe to hub notifications
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    pub fn mode(&self) -> ProxyMode {
        self.config.mode
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Change the mode; refused while any peer is attached
    pub fn set_mode(&mut self, mode: ProxyMode) -> SyncResult<()> {
        if !self.peers.is_empty() {
            warn!(current = %self.config.mode, requested = %mode, "Cannot change mode while connected");
            return Err(SyncError::ModeLocked);
        }
        if mode != self.config.mode {
            info!(%mode, "Hub mode changed");
            self.config.mode = mode;
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }

    pub fn set_heartbeat_interval(&mut self, interval: Duration) {
        if interval != self.config.heartbeat_interval {
            self.config.heartbeat_interval = interval;
            self.emit(HubEvent::HeartbeatIntervalChanged(interval));
        }
    }

    pub fn max_missed_heartbeats(&self) -> u32 {
        self.config.max_missed_heartbeats
    }

    pub fn set_max_missed_heartbeats(&mut self, count: u32) {
        if count != self.config.max_missed_heartbeats {
            self.config.max_missed_heartbeats = count;
            self.emit(HubEvent::MaxMissedHeartbeatsChanged(count));
        }
    }

    /// True when at least one peer is attached and every peer is secure
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    // ----- peers -----

    /// Attach an open link; attaching the same link twice returns its id
    pub fn add_peer(&mut self, link: Rc<RefCell<dyn PeerLink>>) -> SyncResult<PeerId> {
        if let Some(id) = self.peer_id_of(&link) {
            return Ok(id);
        }

        let open = link
            .try_borrow()
            .map(|l| l.is_open())
            .map_err(|_| SyncError::ObjectBusy("peer link".into()))?;
        if !open {
            warn!("Refusing to add a peer that is not open");
            return Err(SyncError::PeerClosed);
        }
        if self.config.mode == ProxyMode::Client && !self.peers.is_empty() {
            warn!("Only one peer allowed in client mode");
            return Err(SyncError::PeerLimitReached);
        }

        let id = PeerId(self.next_peer);
        link.try_borrow_mut()
            .map_err(|_| SyncError::ObjectBusy("peer link".into()))?
            .set_notifier(Some(PeerNotifier::new(id, self.inbox_tx.clone())));
        self.next_peer += 1;
        self.peers.insert(id, link);

        info!(peer = %id, peers = self.peers.len(), mode = %self.config.mode, "Peer added");
        if self.peers.len() == 1 {
            self.emit(HubEvent::Connected);
        }
        self.update_secure_state();
        Ok(id)
    }

    pub fn remove_peer(&mut self, peer: PeerId) -> SyncResult<()> {
        if self.peers.is_empty() {
            warn!(%peer, "Cannot remove peer, no peers in use");
            return Err(SyncError::NoPeers);
        }
        let Some(link) = self.peers.remove(&peer) else {
            warn!(%peer, "Cannot remove unknown peer");
            return Err(SyncError::UnknownPeer(peer.0));
        };

        match link.try_borrow_mut() {
            Ok(mut l) => l.set_notifier(None),
            Err(_) => warn!(%peer, "Peer link busy, notifier not cleared"),
        }
        info!(%peer, remaining = self.peers.len(), "Peer removed");
        self.emit(HubEvent::PeerRemoved(peer));
        self.deferred.push_back(DeferredAction::Release(link));

        if self.peers.is_empty() {
            self.emit(HubEvent::Disconnected);
        }
        self.update_secure_state();
        Ok(())
    }

    pub fn remove_all_peers(&mut self) {
        for peer in self.peer_ids() {
            // Ids come from the live set, removal cannot fail
            let _ = self.remove_peer(peer);
        }
    }

    fn peer_id_of(&self, link: &Rc<RefCell<dyn PeerLink>>) -> Option<PeerId> {
        let target = Rc::as_ptr(link) as *const ();
        self.peers
            .iter()
            .find(|(_, l)| Rc::as_ptr(l) as *const () == target)
            .map(|(id, _)| *id)
    }

    fn schedule_removal(&mut self, peer: PeerId) {
        let queued = self
            .deferred
            .iter()
            .any(|a| matches!(a, DeferredAction::RemovePeer(p) if *p == peer));
        if !queued {
            debug!(%peer, "Peer closed, removal deferred");
            self.deferred.push_back(DeferredAction::RemovePeer(peer));
        }
    }

    fn update_secure_state(&mut self) {
        let secure = !self.peers.is_empty()
            && self
                .peers
                .values()
                .all(|l| l.try_borrow().map(|l| l.is_secure()).unwrap_or(false));
        if secure != self.secure {
            self.secure = secure;
            debug!(secure, "Secure state changed");
            self.emit(HubEvent::SecureStateChanged(secure));
        }
    }

    // ----- outbound -----

    /// Send to every open peer; closed peers are removed on the next poll
    pub fn broadcast(&mut self, message: &ProtocolMessage) {
        let mut closed = Vec::new();

        for (&id, link) in &self.peers {
            let Ok(mut link) = link.try_borrow_mut() else {
                warn!(peer = %id, kind = message.kind(), "Peer link busy, message dropped");
                continue;
            };
            if !link.is_open() {
                closed.push(id);
                continue;
            }
            match link.dispatch(message) {
                Ok(()) => {}
                Err(SyncError::PeerClosed) => closed.push(id),
                Err(e) => warn!(peer = %id, kind = message.kind(), error = %e, "Failed to dispatch message"),
            }
        }

        for id in closed {
            self.schedule_removal(id);
        }
    }

    /// Send to one peer only
    pub fn send_to(&mut self, peer: PeerId, message: &ProtocolMessage) -> SyncResult<()> {
        let Some(link) = self.peers.get(&peer) else {
            return Err(SyncError::UnknownPeer(peer.0));
        };
        let mut link = link
            .try_borrow_mut()
            .map_err(|_| SyncError::ObjectBusy(peer.to_string()))?;

        let result = if link.is_open() {
            link.dispatch(message)
        } else {
            Err(SyncError::PeerClosed)
        };
        drop(link);

        if let Err(SyncError::PeerClosed) = result {
            self.schedule_removal(peer);
        }
        result
    }

    // ----- registry -----

    /// Register an object for synchronization
    ///
    /// A server marks the object initialized right away. A client asks its
    /// peer for the object's state unless it is already initialized.
    pub fn synchronize<T>(&mut self, obj: &Rc<RefCell<T>>) -> SyncResult<()>
    where
        T: SyncableObject + 'static,
    {
        let mut guard = obj
            .try_borrow_mut()
            .map_err(|_| SyncError::ObjectBusy(std::any::type_name::<T>().into()))?;

        let catalog = MethodCatalog::for_type(TypeId::of::<T>(), || guard.describe(), true);
        let class_name = catalog.class_name().to_string();
        let instance = guard.object_name().to_string();

        let weak = Rc::downgrade(obj);
        let weak: Weak<RefCell<dyn SyncableObject>> = weak;
        let previous = self
            .registry
            .entry(class_name.clone())
            .or_default()
            .insert(instance.clone(), RegistryEntry { object: weak, catalog });
        if let Some(previous) = previous {
            if previous.object.as_ptr() as *const () != Rc::as_ptr(obj) as *const () {
                warn!(class = %class_name, instance = %instance, "Replacing a different object with the same name");
            }
        }

        let mut needs_init = false;
        match self.config.mode {
            ProxyMode::Server => {
                if !guard.is_initialized() {
                    guard.mark_initialized();
                    guard.on_initialized();
                }
                self.emit(HubEvent::ObjectInitialized {
                    class_name: class_name.clone(),
                    object_name: instance.clone(),
                });
            }
            ProxyMode::Client => {
                if guard.is_initialized() {
                    self.emit(HubEvent::ObjectInitialized {
                        class_name: class_name.clone(),
                        object_name: instance.clone(),
                    });
                } else {
                    needs_init = true;
                }
            }
        }

        guard.on_synchronize(SyncBinding::new(class_name.clone(), self.inbox_tx.clone()));
        drop(guard);

        debug!(class = %class_name, %instance, "Object synchronized");
        if needs_init {
            self.request_init(&class_name, &instance);
        }
        Ok(())
    }

    /// Remove an object from the registry; returns whether it was registered
    pub fn stop_synchronize<T>(&mut self, obj: &Rc<RefCell<T>>) -> bool
    where
        T: SyncableObject + 'static,
    {
        let target = Rc::as_ptr(obj) as *const ();
        let mut found = false;

        for instances in self.registry.values_mut() {
            instances.retain(|_, entry| {
                let same = entry.object.as_ptr() as *const () == target;
                found |= same;
                !same
            });
        }
        self.registry.retain(|_, instances| !instances.is_empty());

        if found {
            if let Ok(mut guard) = obj.try_borrow_mut() {
                guard.on_stop_synchronize();
            }
        }
        found
    }

    /// Whether an object is registered under this class/instance pair
    pub fn is_synchronized(&self, class_name: &str, instance: &str) -> bool {
        self.registry
            .get(class_name)
            .is_some_and(|instances| instances.contains_key(instance))
    }

    /// Live object and catalog for a class/instance pair; prunes dead entries
    fn lookup(
        &mut self,
        class_name: &str,
        instance: &str,
    ) -> Option<(Rc<RefCell<dyn SyncableObject>>, Arc<MethodCatalog>)> {
        let instances = self.registry.get_mut(class_name)?;
        let entry = instances.get(instance)?;
        match entry.object.upgrade() {
            Some(obj) => Some((obj, Arc::clone(&entry.catalog))),
            None => {
                debug!(class = %class_name, %instance, "Pruning dropped object");
                instances.remove(instance);
                if instances.is_empty() {
                    self.registry.remove(class_name);
                }
                None
            }
        }
    }

    fn request_init(&mut self, class_name: &str, instance: &str) {
        if self.config.mode == ProxyMode::Server {
            return;
        }
        debug!(class = %class_name, %instance, "Requesting init data");
        self.broadcast(&ProtocolMessage::InitRequest {
            class_name: class_name.to_string(),
            instance_name: instance.to_string(),
        });
    }

    /// Rekey an object and tell clients to do the same; ignored in client mode
    pub fn rename_object(&mut self, class_name: &str, old: &str, new: &str) -> SyncResult<()> {
        if self.config.mode == ProxyMode::Client {
            debug!(class = %class_name, %old, %new, "Rename ignored in client mode");
            return Ok(());
        }
        if old == new {
            return Ok(());
        }

        let unknown = || SyncError::UnknownObject {
            class: class_name.to_string(),
            instance: old.to_string(),
        };
        let Some(instances) = self.registry.get_mut(class_name) else {
            warn!(class = %class_name, %old, "Cannot rename unknown object");
            return Err(unknown());
        };
        let Some(entry) = instances.remove(old) else {
            if instances.contains_key(new) {
                debug!(class = %class_name, %old, %new, "Object already renamed");
                return Ok(());
            }
            warn!(class = %class_name, %old, "Cannot rename unknown object");
            return Err(unknown());
        };

        let Some(obj) = entry.object.upgrade() else {
            if instances.is_empty() {
                self.registry.remove(class_name);
            }
            warn!(class = %class_name, %old, "Cannot rename dropped object");
            return Err(SyncError::ObjectDropped(format!("{}/{}", class_name, old)));
        };
        match obj.try_borrow_mut() {
            Ok(mut guard) => guard.core_mut().set_object_name(new),
            Err(_) => warn!(class = %class_name, %old, %new, "Object busy, local name unchanged"),
        }
        instances.insert(new.to_string(), entry);

        info!(class = %class_name, %old, %new, "Object renamed");
        self.broadcast(&ProtocolMessage::RpcCall {
            wire_name: OBJECT_RENAMED.to_string(),
            args: vec![
                Value::from(class_name),
                Value::from(new),
                Value::from(old),
            ],
        });
        Ok(())
    }

    // ----- relay and receivers -----

    /// Relay an event of `source` to all peers as an RPC call
    pub fn attach_event<T>(
        &mut self,
        source: &T,
        event: &str,
        wire_name: Option<&str>,
    ) -> SyncResult<SlotId>
    where
        T: EventSource + 'static,
    {
        let catalog = MethodCatalog::for_type(TypeId::of::<T>(), || source.describe(), true);
        let emitter = source.emitter();

        let Some(slot) = self
            .relay
            .attach(emitter.id(), Arc::clone(&catalog), event, wire_name)
        else {
            warn!(class = %catalog.class_name(), event, "Cannot attach undeclared event");
            return Err(SyncError::UnknownEvent {
                class: catalog.class_name().to_string(),
                event: event.to_string(),
            });
        };

        emitter.connect(&self.inbox_tx);
        Ok(slot)
    }

    /// Detach one event of `source`, or all of them; returns the count removed
    pub fn detach_event<T>(&mut self, source: &T, event: Option<&str>) -> usize
    where
        T: EventSource + 'static,
    {
        let emitter = source.emitter();
        let removed = self.relay.detach(emitter.id(), event);
        if !self.relay.has_source(emitter.id()) {
            emitter.disconnect(&self.inbox_tx);
        }
        removed
    }

    /// Run `method` of `receiver` whenever an RPC call named `wire_name` arrives
    pub fn attach_receiver<T>(
        &mut self,
        wire_name: &str,
        receiver: &Rc<RefCell<T>>,
        method: &str,
    ) -> SyncResult<()>
    where
        T: Reflect + 'static,
    {
        let catalog = {
            let guard = receiver
                .try_borrow()
                .map_err(|_| SyncError::ObjectBusy(std::any::type_name::<T>().into()))?;
            MethodCatalog::for_type(TypeId::of::<T>(), || guard.describe(), true)
        };

        let Some(index) = catalog.method_index(method) else {
            warn!(class = %catalog.class_name(), method, "Cannot attach unknown receiver method");
            return Err(SyncError::UnknownMethod {
                class: catalog.class_name().to_string(),
                method: method.to_string(),
            });
        };

        let weak = Rc::downgrade(receiver);
        let weak: Weak<RefCell<dyn Reflect>> = weak;
        let wire_name = normalize_signature(wire_name);
        debug!(%wire_name, class = %catalog.class_name(), method, "Receiver attached");
        self.receivers.entry(wire_name).or_default().push(ReceiverEntry {
            receiver: weak,
            catalog,
            method: index,
        });
        Ok(())
    }

    /// Detach `receiver` from one wire name, or from all; returns the count removed
    pub fn detach_receiver<T>(&mut self, receiver: &Rc<RefCell<T>>, wire_name: Option<&str>) -> usize
    where
        T: Reflect + 'static,
    {
        let target = Rc::as_ptr(receiver) as *const ();
        let wanted = wire_name.map(normalize_signature);
        let mut removed = 0;

        for (name, entries) in self.receivers.iter_mut() {
            if wanted.as_ref().is_some_and(|w| w != name) {
                continue;
            }
            let before = entries.len();
            entries.retain(|e| e.receiver.as_ptr() as *const () != target);
            removed += before - entries.len();
        }
        self.receivers.retain(|_, entries| !entries.is_empty());
        removed
    }

    // ----- event loop -----

    /// One event-loop iteration
    ///
    /// Runs the actions deferred by the previous iteration, then drains the
    /// inbox. Returns the number of inbox events handled.
    pub fn poll(&mut self) -> usize {
        let pending: Vec<DeferredAction> = self.deferred.drain(..).collect();
        for action in pending {
            match action {
                DeferredAction::RemovePeer(peer) => {
                    if self.peers.contains_key(&peer) {
                        let _ = self.remove_peer(peer);
                    }
                }
                DeferredAction::Release(link) => drop(link),
            }
        }

        let mut handled = 0;
        while let Ok(event) = self.inbox_rx.try_recv() {
            self.handle_local(event);
            handled += 1;
        }
        handled
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            mode: self.config.mode,
            peers: self.peers.len(),
            secure: self.secure,
            relay_slots: self.relay.len(),
            receivers: self.receivers.values().map(Vec::len).sum(),
            wire_names: self.receivers.len(),
            synchronized_objects: self.registry.values().map(HashMap::len).sum(),
            classes: self.registry.len(),
            cached_catalogs: MethodCatalog::cached_count(),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            mode = %stats.mode,
            peers = stats.peers,
            relay_slots = stats.relay_slots,
            receivers = stats.receivers,
            objects = stats.synchronized_objects,
            catalogs = stats.cached_catalogs,
            "Hub statistics"
        );
        debug!("\n{}", stats);
    }

    fn emit(&self, event: HubEvent) {
        debug!(kind = event.kind(), "Hub event");
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

impl fmt::Debug for SyncHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHub")
            .field("mode", &self.config.mode)
            .field("peers", &self.peers.keys().collect::<Vec<_>>())
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl Drop for SyncHub {
    fn drop(&mut self) {
        let entries: Vec<RegistryEntry> = self
            .registry
            .drain()
            .flat_map(|(_, instances)| instances.into_values())
            .collect();
        for entry in entries {
            if let Some(obj) = entry.object.upgrade() {
                if let Ok(mut guard) = obj.try_borrow_mut() {
                    guard.on_stop_synchronize();
                };
            }
        }
        self.remove_all_peers();
    }
}

/// Drive a hub from an async task
///
/// Frames received from `peer` are dispatched as they arrive; the hub is
/// polled after each frame and on every heartbeat tick. Returns when the
/// token is cancelled or the frame stream ends.
pub async fn drive(
    hub: &mut SyncHub,
    peer: PeerId,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    let period = hub.heartbeat_interval().max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%peer, "Hub driver cancelled");
                break;
            }
            frame = frames.recv() => match frame {
                Some(bytes) => {
                    hub.receive(peer, &bytes);
                    hub.poll();
                }
                None => {
                    debug!(%peer, "Frame stream closed");
                    hub.poll();
                    break;
                }
            },
            _ = ticker.tick() => {
                hub.poll();
            }
        }
    }
}
