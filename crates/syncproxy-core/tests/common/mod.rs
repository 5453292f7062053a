//! Shared fixtures for the integration tests
//!
//! - `Settings`: synchronized object with a request/receive pair and an event
//! - `Buffer`: synchronized object used by the rename tests
//! - `Echo`: plain receiver for relayed RPC calls
//! - `Wire`: a server hub and a client hub joined by a `MemoryLink` pair

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use syncproxy_core::{
    ClassDescriptor, EventEmitter, EventSource, MemoryEnd, MemoryLink, MethodDecl, PeerId,
    PropertyMap, ProtocolMessage, ProxyMode, Reflect, SyncCore, SyncHub, SyncableObject, TypeTag,
    Value,
};

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug)]
pub struct Settings {
    pub core: SyncCore,
    pub volume: i64,
    pub theme: String,
    pub set_volume_calls: Vec<Vec<Value>>,
    pub replies: Vec<(i64, bool)>,
    pub updated_remotely: usize,
    pub initialized_hooks: usize,
}

impl Settings {
    pub fn new(name: &str) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::plain(name)))
    }

    pub fn plain(name: &str) -> Self {
        Self {
            core: SyncCore::new(name),
            volume: 0,
            theme: "dark".to_string(),
            set_volume_calls: Vec::new(),
            replies: Vec::new(),
            updated_remotely: 0,
            initialized_hooks: 0,
        }
    }

    /// Local change that is announced through `valueChanged`
    pub fn set_volume(&mut self, volume: i64) {
        self.volume = volume;
        self.core.emit("valueChanged", vec![Value::Int(volume)]);
    }
}

impl Reflect for Settings {
    fn describe(&self) -> ClassDescriptor {
        ClassDescriptor::new("Settings")
            .method("setVolume", &[TypeTag::Int], |s: &mut Settings, args| {
                s.set_volume_calls.push(args.to_vec());
                s.volume = args[0].as_i64().unwrap_or_default();
                Ok(None)
            })
            .method_with(
                MethodDecl::new(
                    "setTheme",
                    &[TypeTag::String, TypeTag::Bool],
                    |s: &mut Settings, args| {
                        s.theme = args[0].as_str().unwrap_or_default().to_string();
                        Ok(None)
                    },
                )
                .optional(1),
            )
            .method_with(
                MethodDecl::new("requestSetVolume", &[TypeTag::Int], |s: &mut Settings, args| {
                    let volume = args[0].as_i64().unwrap_or_default();
                    let accepted = (0..=100).contains(&volume);
                    if accepted {
                        s.volume = volume;
                        s.core.sync("setVolume", vec![Value::Int(volume)]);
                    }
                    Ok(Some(Value::Bool(accepted)))
                })
                .returns(TypeTag::Bool),
            )
            .method(
                "receiveSetVolume",
                &[TypeTag::Int, TypeTag::Bool],
                |s: &mut Settings, args| {
                    let volume = args[0].as_i64().unwrap_or_default();
                    let accepted = args[1].as_bool().unwrap_or(false);
                    s.replies.push((volume, accepted));
                    Ok(None)
                },
            )
            .event("valueChanged", &[TypeTag::Int])
            .event("themeChanged", &[TypeTag::String])
    }
}

impl EventSource for Settings {
    fn emitter(&self) -> &EventEmitter {
        self.core.emitter()
    }
}

impl SyncableObject for Settings {
    fn core(&self) -> &SyncCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SyncCore {
        &mut self.core
    }

    fn to_property_map(&self) -> PropertyMap {
        PropertyMap::from([
            ("volume".to_string(), Value::Int(self.volume)),
            ("theme".to_string(), Value::from(self.theme.as_str())),
        ])
    }

    fn apply_property_map(&mut self, properties: &PropertyMap) {
        if let Some(volume) = properties.get("volume").and_then(Value::as_i64) {
            self.volume = volume;
        }
        if let Some(theme) = properties.get("theme").and_then(Value::as_str) {
            self.theme = theme.to_string();
        }
    }

    fn on_initialized(&mut self) {
        self.initialized_hooks += 1;
    }

    fn on_updated_remotely(&mut self) {
        self.updated_remotely += 1;
    }
}

// ============================================================================
// Buffer
// ============================================================================

#[derive(Debug)]
pub struct Buffer {
    pub core: SyncCore,
    pub topic: String,
    pub lines: Vec<String>,
}

impl Buffer {
    pub fn new(name: &str) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            core: SyncCore::new(name),
            topic: String::new(),
            lines: Vec::new(),
        }))
    }
}

impl Reflect for Buffer {
    fn describe(&self) -> ClassDescriptor {
        ClassDescriptor::new("Buffer")
            .method("setTopic", &[TypeTag::String], |b: &mut Buffer, args| {
                b.topic = args[0].as_str().unwrap_or_default().to_string();
                Ok(None)
            })
            .method("appendLine", &[TypeTag::String], |b: &mut Buffer, args| {
                b.lines.push(args[0].as_str().unwrap_or_default().to_string());
                Ok(None)
            })
    }
}

impl SyncableObject for Buffer {
    fn core(&self) -> &SyncCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SyncCore {
        &mut self.core
    }

    fn to_property_map(&self) -> PropertyMap {
        PropertyMap::from([
            ("topic".to_string(), Value::from(self.topic.as_str())),
            (
                "lines".to_string(),
                Value::List(self.lines.iter().map(|l| Value::from(l.as_str())).collect()),
            ),
        ])
    }

    fn apply_property_map(&mut self, properties: &PropertyMap) {
        if let Some(topic) = properties.get("topic").and_then(Value::as_str) {
            self.topic = topic.to_string();
        }
        if let Some(lines) = properties.get("lines").and_then(Value::as_list) {
            self.lines = lines
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
    }
}

// ============================================================================
// Echo
// ============================================================================

#[derive(Debug, Default)]
pub struct Echo {
    pub label: &'static str,
    pub values: Vec<i64>,
    pub texts: Vec<String>,
    /// Shared call log for ordering assertions across receivers
    pub log: Option<Rc<RefCell<Vec<String>>>>,
}

impl Echo {
    pub fn new(label: &'static str) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            label,
            ..Self::default()
        }))
    }

    pub fn logging(label: &'static str, log: &Rc<RefCell<Vec<String>>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            label,
            log: Some(Rc::clone(log)),
            ..Self::default()
        }))
    }
}

impl Reflect for Echo {
    fn describe(&self) -> ClassDescriptor {
        ClassDescriptor::new("Echo")
            .method("onValue", &[TypeTag::Int], |e: &mut Echo, args| {
                e.values.push(args[0].as_i64().unwrap_or_default());
                if let Some(log) = &e.log {
                    log.borrow_mut().push(e.label.to_string());
                }
                Ok(None)
            })
            .method("onText", &[TypeTag::String], |e: &mut Echo, args| {
                e.texts.push(args[0].as_str().unwrap_or_default().to_string());
                Ok(None)
            })
    }
}

// ============================================================================
// Wire
// ============================================================================

/// A server hub and a client hub connected in memory
pub struct Wire {
    pub server: SyncHub,
    pub client: SyncHub,
    pub server_end: MemoryEnd,
    pub client_end: MemoryEnd,
    /// Id of the client as seen by the server
    pub to_client: PeerId,
    /// Id of the server as seen by the client
    pub to_server: PeerId,
}

impl Wire {
    pub fn connect() -> Self {
        let mut server = SyncHub::new(ProxyMode::Server);
        let mut client = SyncHub::new(ProxyMode::Client);
        let (server_end, client_end) = MemoryLink::pair();

        let to_client = server.add_peer(server_end.link.clone()).unwrap();
        let to_server = client.add_peer(client_end.link.clone()).unwrap();

        Self {
            server,
            client,
            server_end,
            client_end,
            to_client,
            to_server,
        }
    }

    /// Move frames and poll both hubs until nothing happens
    pub fn pump(&mut self) {
        for _ in 0..64 {
            let mut activity = self.server.poll() + self.client.poll();

            while let Ok(frame) = self.server_end.frames.try_recv() {
                self.server.receive(self.to_client, &frame);
                activity += 1;
            }
            while let Ok(frame) = self.client_end.frames.try_recv() {
                self.client.receive(self.to_server, &frame);
                activity += 1;
            }

            if activity == 0 {
                break;
            }
        }
        self.server.poll();
        self.client.poll();
    }
}

/// Decode every frame waiting at `end`
pub fn take_messages(end: &mut MemoryEnd) -> Vec<ProtocolMessage> {
    std::iter::from_fn(|| end.frames.try_recv().ok())
        .map(|frame| ProtocolMessage::decode(&frame).unwrap())
        .collect()
}

/// Drain every notification currently queued on a hub subscription
pub fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<syncproxy_core::HubEvent>,
) -> Vec<syncproxy_core::HubEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

pub fn props(pairs: &[(&str, Value)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
