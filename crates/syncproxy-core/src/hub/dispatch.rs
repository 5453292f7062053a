//! Inbound message dispatch and inbox handling
//!
//! Nothing here returns an error to the sender: protocol violations are
//! logged and the message is dropped.

use tracing::{debug, trace, warn};

use super::{HubEvent, ProxyMode, SyncHub, OBJECT_RENAMED};
use crate::error::SyncError;
use crate::event::{LocalEvent, PeerSignal, RaisedEvent};
use crate::invoke::invoke_slot;
use crate::object::{OutboundCall, Reflect, SyncableObject};
use crate::peer::PeerId;
use crate::protocol::ProtocolMessage;
use crate::value::{PropertyMap, Value};

impl SyncHub {
    /// Decode one frame received from `peer` and dispatch it
    pub fn receive(&mut self, peer: PeerId, frame: &[u8]) {
        match ProtocolMessage::decode(frame) {
            Ok(message) => self.handle_message(peer, message),
            Err(e) => warn!(%peer, len = frame.len(), error = %e, "Dropping undecodable frame"),
        }
    }

    /// Dispatch one message received from `peer`
    pub fn handle_message(&mut self, peer: PeerId, message: ProtocolMessage) {
        trace!(%peer, kind = message.kind(), "Handling message");
        match message {
            ProtocolMessage::Sync {
                class_name,
                instance_name,
                method_name,
                args,
            } => self.handle_sync(peer, &class_name, &instance_name, &method_name, args),
            ProtocolMessage::InitRequest {
                class_name,
                instance_name,
            } => self.handle_init_request(peer, &class_name, &instance_name),
            ProtocolMessage::InitData {
                class_name,
                instance_name,
                properties,
            } => self.handle_init_data(&class_name, &instance_name, &properties),
            ProtocolMessage::RpcCall { wire_name, args } => self.handle_rpc_call(&wire_name, &args),
        }
    }

    fn handle_sync(
        &mut self,
        peer: PeerId,
        class_name: &str,
        instance: &str,
        method_name: &str,
        args: Vec<Value>,
    ) {
        let Some((obj, catalog)) = self.lookup(class_name, instance) else {
            warn!(class = %class_name, %instance, method = %method_name, "Sync message for unknown object");
            return;
        };

        let Some(index) = catalog.method_index(method_name) else {
            warn!(class = %class_name, %instance, method = %method_name, "Sync message for unknown method");
            return;
        };
        let Some(method) = catalog.method(index) else {
            return;
        };

        if method.direction != self.config.mode {
            let error = SyncError::WrongMode {
                method: method.name.clone(),
                expected: method.direction,
                actual: self.config.mode,
            };
            warn!(class = %class_name, %instance, %error, "Sync message dropped");
            return;
        }

        let result = {
            let Ok(mut guard) = obj.try_borrow_mut() else {
                warn!(class = %class_name, %instance, method = %method_name, "Object busy, sync message dropped");
                return;
            };
            let target: &mut dyn SyncableObject = &mut *guard;
            let affinity = target.core().affinity();
            invoke_slot(target.as_any_mut(), Some(affinity), method, &args)
        };

        let returned = match result {
            Ok(returned) => returned,
            Err(e) => {
                warn!(class = %class_name, %instance, method = %method_name, error = %e, "Invocation failed");
                return;
            }
        };

        if let Some(value) = returned {
            match catalog.receive_pairing(index) {
                Some(_) if value.type_tag() != method.return_type => {
                    warn!(
                        class = %class_name,
                        method = %method.name,
                        declared = ?method.return_type,
                        actual = ?value.type_tag(),
                        "Return value does not match declared type, not delivered"
                    );
                }
                Some(pairing) => {
                    let Some(receive) = catalog.method(pairing.method) else {
                        return;
                    };
                    // Receive signature is the declared params plus the return value
                    let mut reply_args = if pairing.prepend_args {
                        let mut args = args;
                        args.truncate(method.arg_types.len());
                        args
                    } else {
                        Vec::new()
                    };
                    reply_args.push(value);

                    let reply = ProtocolMessage::Sync {
                        class_name: class_name.to_string(),
                        instance_name: instance.to_string(),
                        method_name: receive.name.clone(),
                        args: reply_args,
                    };
                    if let Err(e) = self.send_to(peer, &reply) {
                        warn!(%peer, method = %receive.name, error = %e, "Failed to deliver return value");
                    }
                }
                None => trace!(method = %method_name, "Return value dropped, no receive method"),
            }
        }

        match obj.try_borrow_mut() {
            Ok(mut guard) => guard.on_updated_remotely(),
            Err(_) => warn!(class = %class_name, %instance, "Object busy, update hook skipped"),
        };
    }

    fn handle_init_request(&mut self, peer: PeerId, class_name: &str, instance: &str) {
        let Some((obj, _)) = self.lookup(class_name, instance) else {
            warn!(%peer, class = %class_name, %instance, "Init request for unknown object");
            return;
        };

        let properties = match obj.try_borrow() {
            Ok(guard) => guard.to_property_map(),
            Err(_) => {
                warn!(class = %class_name, %instance, "Object busy, init request dropped");
                return;
            }
        };

        debug!(%peer, class = %class_name, %instance, properties = properties.len(), "Sending init data");
        let reply = ProtocolMessage::InitData {
            class_name: class_name.to_string(),
            instance_name: instance.to_string(),
            properties,
        };
        if let Err(e) = self.send_to(peer, &reply) {
            warn!(%peer, class = %class_name, %instance, error = %e, "Failed to send init data");
        }
    }

    fn handle_init_data(&mut self, class_name: &str, instance: &str, properties: &PropertyMap) {
        let Some((obj, _)) = self.lookup(class_name, instance) else {
            warn!(class = %class_name, %instance, "Init data for unknown object");
            return;
        };

        {
            let Ok(mut guard) = obj.try_borrow_mut() else {
                warn!(class = %class_name, %instance, "Object busy, init data dropped");
                return;
            };
            if guard.is_initialized() {
                trace!(class = %class_name, %instance, "Already initialized, init data ignored");
                return;
            }
            guard.apply_property_map(properties);
            guard.mark_initialized();
            guard.on_initialized();
        }

        debug!(class = %class_name, %instance, "Object initialized from peer");
        self.emit(HubEvent::ObjectInitialized {
            class_name: class_name.to_string(),
            object_name: instance.to_string(),
        });

        if let Ok(mut guard) = obj.try_borrow_mut() {
            guard.on_updated_remotely();
        };
    }

    fn handle_rpc_call(&mut self, wire_name: &str, args: &[Value]) {
        if wire_name == OBJECT_RENAMED && self.config.mode == ProxyMode::Client {
            self.handle_object_renamed(args);
            return;
        }

        let Some(entries) = self.receivers.get_mut(wire_name) else {
            trace!(%wire_name, "No receivers attached");
            return;
        };

        entries.retain(|entry| entry.receiver.strong_count() > 0);

        for entry in entries.iter() {
            let Some(receiver) = entry.receiver.upgrade() else {
                continue;
            };
            let Some(method) = entry.catalog.method(entry.method) else {
                continue;
            };
            let Ok(mut guard) = receiver.try_borrow_mut() else {
                warn!(%wire_name, method = %method.name, "Receiver busy, call skipped");
                continue;
            };
            let target: &mut dyn Reflect = &mut *guard;
            let affinity = target.affinity();
            if let Err(e) = invoke_slot(target.as_any_mut(), affinity, method, args) {
                warn!(%wire_name, method = %method.name, error = %e, "Receiver invocation failed");
            }
        }
    }

    fn handle_object_renamed(&mut self, args: &[Value]) {
        let (Some(class_name), Some(new), Some(old)) = (
            args.first().and_then(Value::as_str),
            args.get(1).and_then(Value::as_str),
            args.get(2).and_then(Value::as_str),
        ) else {
            warn!(args = args.len(), "Malformed rename notification");
            return;
        };

        let Some(instances) = self.registry.get_mut(class_name) else {
            debug!(class = %class_name, %old, %new, "Rename for unknown class ignored");
            return;
        };
        let Some(entry) = instances.remove(old) else {
            debug!(class = %class_name, %old, %new, "Rename for unknown object ignored");
            return;
        };

        let mut needs_init = false;
        if let Some(obj) = entry.object.upgrade() {
            match obj.try_borrow_mut() {
                Ok(mut guard) => {
                    guard.core_mut().set_object_name(new);
                    needs_init = !guard.is_initialized();
                }
                Err(_) => warn!(class = %class_name, %old, %new, "Object busy, local name unchanged"),
            };
        }
        instances.insert(new.to_string(), entry);
        debug!(class = %class_name, %old, %new, "Object renamed by peer");

        if needs_init {
            self.request_init(class_name, new);
        }
    }

    pub(super) fn handle_local(&mut self, event: LocalEvent) {
        match event {
            LocalEvent::Raised(raised) => self.relay_event(&raised),
            LocalEvent::SourceDropped(source) => {
                let removed = self.relay.detach(source, None);
                if removed > 0 {
                    debug!(%source, removed, "Detached events of dropped source");
                }
            }
            LocalEvent::SyncCall(call) => self.handle_outbound_call(call),
            LocalEvent::Peer { peer, signal } => self.handle_peer_signal(peer, signal),
        }
    }

    fn relay_event(&mut self, raised: &RaisedEvent) {
        for message in self.relay.deliver(raised) {
            self.broadcast(&message);
        }
    }

    fn handle_outbound_call(&mut self, call: OutboundCall) {
        let OutboundCall {
            mode,
            class_name,
            instance_name,
            method,
            args,
        } = call;

        if mode != self.config.mode {
            trace!(class = %class_name, %method, %mode, "Outbound call not for this mode");
            return;
        }

        let Some((_, catalog)) = self.lookup(&class_name, &instance_name) else {
            warn!(class = %class_name, instance = %instance_name, %method, "Outbound call from unregistered object");
            return;
        };
        let Some(descriptor) = catalog.find_method(&method) else {
            warn!(class = %class_name, %method, "Outbound call to unknown method");
            return;
        };
        if let Some(index) = args.iter().position(|v| !v.is_valid()) {
            warn!(class = %class_name, %method, index, "Outbound call with invalid argument");
            return;
        }

        let message = ProtocolMessage::Sync {
            class_name,
            instance_name,
            method_name: descriptor.name.clone(),
            args,
        };
        self.broadcast(&message);
    }

    fn handle_peer_signal(&mut self, peer: PeerId, signal: PeerSignal) {
        match signal {
            PeerSignal::Disconnected => {
                if self.peers.contains_key(&peer) {
                    let _ = self.remove_peer(peer);
                } else {
                    trace!(%peer, "Disconnect from detached peer");
                }
            }
            PeerSignal::SecureStateChanged(secure) => {
                trace!(%peer, secure, "Peer secure state changed");
                self.update_secure_state();
            }
            PeerSignal::LagUpdated(lag) => {
                if self.config.mode == ProxyMode::Client && self.peers.contains_key(&peer) {
                    self.emit(HubEvent::LagUpdated(lag));
                }
            }
        }
    }
}
