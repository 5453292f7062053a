//! Object contracts
//!
//! ```text
//! Reflect            describe() → ClassDescriptor, affinity()
//!  ├── EventSource   emitter()
//!  └── SyncableObject
//!        core()/core_mut()        SyncCore: name, initialized, emitter, binding
//!        to_property_map()        full state for InitData
//!        apply_property_map()     state received from InitData
//!        on_initialized()         hook
//!        on_updated_remotely()    hook
//! ```
//!
//! Objects never hold a reference to their hub. While synchronized they hold a
//! [`SyncBinding`], a channel into the hub's inbox used for outbound calls.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tracing::{debug, trace};

use crate::catalog::{ClassDescriptor, MethodCatalog};
use crate::event::{EventEmitter, Inbox, LocalEvent};
use crate::hub::ProxyMode;
use crate::value::{PropertyMap, Value};

/// Access to the concrete type behind a trait object
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A type that can describe its callable methods and events
pub trait Reflect: AsAny {
    /// Registration table for this type; read once per process
    fn describe(&self) -> ClassDescriptor;

    /// Thread the object is bound to, `None` when callable from anywhere
    fn affinity(&self) -> Option<ThreadId> {
        None
    }
}

/// Cached catalog for the concrete type of `obj`
pub fn catalog_of(obj: &dyn Reflect, check_conflicts: bool) -> Arc<MethodCatalog> {
    let type_id: TypeId = obj.as_any().type_id();
    MethodCatalog::for_type(type_id, || obj.describe(), check_conflicts)
}

/// An object whose events can be relayed
pub trait EventSource: Reflect {
    fn emitter(&self) -> &EventEmitter;
}

/// A call an object asks its hub to broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCall {
    /// Hub mode under which the call is sent
    pub mode: ProxyMode,
    pub class_name: String,
    pub instance_name: String,
    pub method: String,
    pub args: Vec<Value>,
}

/// Connection from a synchronized object to its hub
#[derive(Debug, Clone)]
pub struct SyncBinding {
    class_name: String,
    inbox: Inbox,
}

impl SyncBinding {
    pub(crate) fn new(class_name: impl Into<String>, inbox: Inbox) -> Self {
        Self {
            class_name: class_name.into(),
            inbox,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    fn send(&self, call: OutboundCall) {
        if self.inbox.send(LocalEvent::SyncCall(call)).is_err() {
            debug!(class = %self.class_name, "Hub gone, dropping outbound call");
        }
    }
}

/// State every synchronized object carries
#[derive(Debug)]
pub struct SyncCore {
    object_name: String,
    initialized: bool,
    emitter: EventEmitter,
    binding: Option<SyncBinding>,
    affinity: ThreadId,
}

impl SyncCore {
    /// New uninitialized core bound to the current thread
    pub fn new(object_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            initialized: false,
            emitter: EventEmitter::new(),
            binding: None,
            affinity: thread::current().id(),
        }
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub(crate) fn set_object_name(&mut self, name: impl Into<String>) {
        self.object_name = name.into();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Raise a local event on this object
    pub fn emit(&self, event: &str, args: Vec<Value>) {
        self.emitter.emit(event, args);
    }

    pub fn affinity(&self) -> ThreadId {
        self.affinity
    }

    /// Rebind the object to the calling thread
    pub fn move_to_current_context(&mut self) {
        self.affinity = thread::current().id();
    }

    pub fn binding(&self) -> Option<&SyncBinding> {
        self.binding.as_ref()
    }

    pub fn is_synchronized(&self) -> bool {
        self.binding.is_some()
    }

    pub(crate) fn bind(&mut self, binding: SyncBinding) {
        self.binding = Some(binding);
    }

    pub(crate) fn unbind(&mut self) {
        self.binding = None;
    }

    /// Broadcast a state change to clients; only sent by a server-mode hub
    pub fn sync(&self, method: &str, args: Vec<Value>) {
        self.call(ProxyMode::Server, method, args);
    }

    /// Ask the server to run a method; only sent by a client-mode hub
    pub fn request(&self, method: &str, args: Vec<Value>) {
        self.call(ProxyMode::Client, method, args);
    }

    fn call(&self, mode: ProxyMode, method: &str, args: Vec<Value>) {
        let Some(binding) = &self.binding else {
            trace!(object = %self.object_name, method, "Not synchronized, call not sent");
            return;
        };
        binding.send(OutboundCall {
            mode,
            class_name: binding.class_name.clone(),
            instance_name: self.object_name.clone(),
            method: method.to_string(),
            args,
        });
    }
}

/// An object whose state is mirrored between hubs
pub trait SyncableObject: Reflect {
    fn core(&self) -> &SyncCore;

    fn core_mut(&mut self) -> &mut SyncCore;

    /// Full state, sent in answer to an init request
    fn to_property_map(&self) -> PropertyMap;

    /// Replace state with the contents of an init reply
    fn apply_property_map(&mut self, properties: &PropertyMap);

    fn class_name(&self) -> String {
        MethodCatalog::for_type(self.as_any().type_id(), || self.describe(), false)
            .class_name()
            .to_string()
    }

    fn object_name(&self) -> &str {
        self.core().object_name()
    }

    fn is_initialized(&self) -> bool {
        self.core().is_initialized()
    }

    fn mark_initialized(&mut self) {
        self.core_mut().set_initialized();
    }

    fn on_initialized(&mut self) {
        self.core().emit("initialized", Vec::new());
    }

    fn on_updated_remotely(&mut self) {
        self.core().emit("updatedRemotely", Vec::new());
    }

    /// Called once the hub has registered the object
    fn on_synchronize(&mut self, binding: SyncBinding) {
        self.core_mut().bind(binding);
    }

    /// Called once the hub has released the object
    fn on_stop_synchronize(&mut self) {
        self.core_mut().unbind();
    }
}
