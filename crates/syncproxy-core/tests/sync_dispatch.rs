//! Sync message dispatch: argument validation, direction, return values

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{take_messages, Settings, Wire};
use syncproxy_core::{
    ClassDescriptor, MemoryLink, MethodDecl, PropertyMap, ProtocolMessage, Reflect, SyncCore,
    SyncableObject, TypeTag, Value,
};

type Shared<T> = Rc<RefCell<T>>;

fn sync(method: &str, args: Vec<Value>) -> ProtocolMessage {
    ProtocolMessage::Sync {
        class_name: "Settings".into(),
        instance_name: "core".into(),
        method_name: method.into(),
        args,
    }
}

/// A wire with an initialized "core" Settings object on each side
fn synced_pair() -> (Wire, Shared<Settings>, Shared<Settings>) {
    let mut wire = Wire::connect();
    let server = Settings::new("core");
    let client = Settings::new("core");
    wire.server.synchronize(&server).unwrap();
    wire.client.synchronize(&client).unwrap();
    wire.pump();
    assert!(client.borrow().core.is_initialized());
    client.borrow_mut().updated_remotely = 0;
    (wire, server, client)
}

// ===== Client-side invocation =====

#[test]
fn test_sync_invokes_exactly_once() {
    let (mut wire, _server, client) = synced_pair();

    wire.client.handle_message(wire.to_server, sync("setVolume", vec![Value::Int(7)]));

    let c = client.borrow();
    assert_eq!(c.set_volume_calls, vec![vec![Value::Int(7)]]);
    assert_eq!(c.volume, 7);
    assert_eq!(c.updated_remotely, 1);
}

#[test]
fn test_sync_accepts_signature_form() {
    let (mut wire, _server, client) = synced_pair();

    wire.client.handle_message(wire.to_server, sync("setVolume(int)", vec![Value::Int(3)]));

    assert_eq!(client.borrow().volume, 3);
}

#[test]
fn test_extra_arguments_are_truncated() {
    let (mut wire, _server, client) = synced_pair();

    wire.client.handle_message(
        wire.to_server,
        sync("setVolume", vec![Value::Int(7), Value::from("extra"), Value::Bool(true)]),
    );

    let c = client.borrow();
    assert_eq!(c.set_volume_calls, vec![vec![Value::Int(7)]]);
    assert_eq!(c.updated_remotely, 1);
}

#[test]
fn test_missing_arguments_drop_the_message() {
    let (mut wire, _server, client) = synced_pair();

    wire.client.handle_message(wire.to_server, sync("setVolume", vec![]));

    let c = client.borrow();
    assert!(c.set_volume_calls.is_empty());
    assert_eq!(c.updated_remotely, 0);
}

#[test]
fn test_optional_trailing_argument() {
    let (mut wire, _server, client) = synced_pair();

    wire.client.handle_message(wire.to_server, sync("setTheme", vec![Value::from("light")]));
    assert_eq!(client.borrow().theme, "light");

    wire.client.handle_message(
        wire.to_server,
        sync("setTheme", vec![Value::from("mono"), Value::Bool(true)]),
    );
    assert_eq!(client.borrow().theme, "mono");
    assert_eq!(client.borrow().updated_remotely, 2);
}

#[test]
fn test_mistyped_or_invalid_arguments_drop_the_message() {
    let (mut wire, _server, client) = synced_pair();

    wire.client.handle_message(wire.to_server, sync("setVolume", vec![Value::from("loud")]));
    wire.client.handle_message(wire.to_server, sync("setVolume", vec![Value::Invalid]));

    let c = client.borrow();
    assert!(c.set_volume_calls.is_empty());
    assert_eq!(c.updated_remotely, 0);
}

#[test]
fn test_unknown_targets_are_dropped() {
    let (mut wire, _server, client) = synced_pair();

    wire.client.handle_message(wire.to_server, sync("setColor", vec![Value::Int(1)]));
    wire.client.handle_message(
        wire.to_server,
        ProtocolMessage::Sync {
            class_name: "Settings".into(),
            instance_name: "other".into(),
            method_name: "setVolume".into(),
            args: vec![Value::Int(1)],
        },
    );

    let c = client.borrow();
    assert!(c.set_volume_calls.is_empty());
    assert_eq!(c.updated_remotely, 0);
}

// ===== Direction =====

#[test]
fn test_server_ignores_client_methods() {
    let (mut wire, server, _client) = synced_pair();

    wire.server.handle_message(wire.to_client, sync("setVolume", vec![Value::Int(9)]));

    let s = server.borrow();
    assert!(s.set_volume_calls.is_empty());
    assert_eq!(s.updated_remotely, 0);
}

#[test]
fn test_client_ignores_request_methods() {
    let (mut wire, _server, client) = synced_pair();

    wire.client.handle_message(wire.to_server, sync("requestSetVolume", vec![Value::Int(9)]));

    let c = client.borrow();
    assert_eq!(c.volume, 0);
    assert_eq!(c.updated_remotely, 0);
    assert!(take_messages(&mut wire.server_end).is_empty());
}

// ===== Request / receive =====

#[test]
fn test_request_round_trip_delivers_return_value() {
    let (mut wire, server, client) = synced_pair();

    client.borrow().core.request("requestSetVolume", vec![Value::Int(30)]);
    wire.pump();

    assert_eq!(server.borrow().volume, 30);
    assert_eq!(server.borrow().updated_remotely, 1);

    let c = client.borrow();
    assert_eq!(c.replies, vec![(30, true)]);
    // The server also announced the change through setVolume
    assert_eq!(c.set_volume_calls, vec![vec![Value::Int(30)]]);
    assert_eq!(c.volume, 30);
}

#[test]
fn test_rejected_request_still_replies() {
    let (mut wire, server, client) = synced_pair();

    client.borrow().core.request("requestSetVolume", vec![Value::Int(150)]);
    wire.pump();

    assert_eq!(server.borrow().volume, 0);
    let c = client.borrow();
    assert_eq!(c.replies, vec![(150, false)]);
    assert!(c.set_volume_calls.is_empty());
}

#[test]
fn test_return_value_goes_only_to_requesting_peer() {
    let mut wire = Wire::connect();
    let (extra_server_end, mut extra_client_end) = MemoryLink::pair();
    wire.server.add_peer(extra_server_end.link.clone()).unwrap();

    let server = Settings::new("core");
    wire.server.synchronize(&server).unwrap();

    wire.server.handle_message(wire.to_client, sync("requestSetVolume", vec![Value::Int(10)]));

    let to_requester = take_messages(&mut wire.client_end);
    assert!(to_requester.iter().any(|m| matches!(
        m,
        ProtocolMessage::Sync { method_name, args, .. }
            if method_name == "receiveSetVolume" && args == &vec![Value::Int(10), Value::Bool(true)]
    )));

    // The other client only sees the broadcast state change
    wire.server.poll();
    let _ = take_messages(&mut wire.client_end);
    let to_other = take_messages(&mut extra_client_end);
    assert_eq!(to_other, vec![sync("setVolume", vec![Value::Int(10)])]);
}

#[test]
fn test_surplus_request_arguments_are_not_echoed_back() {
    let (mut wire, server, client) = synced_pair();

    wire.server.handle_message(
        wire.to_client,
        sync("requestSetVolume", vec![Value::Int(7), Value::from("extra")]),
    );
    assert!(take_messages(&mut wire.client_end).iter().any(|m| matches!(
        m,
        ProtocolMessage::Sync { method_name, args, .. }
            if method_name == "receiveSetVolume" && args == &vec![Value::Int(7), Value::Bool(true)]
    )));

    client
        .borrow()
        .core
        .request("requestSetVolume", vec![Value::Int(9), Value::from("extra")]);
    wire.pump();

    assert_eq!(server.borrow().volume, 9);
    assert_eq!(client.borrow().replies, vec![(9, true)]);
}

/// Request handler that answers with whatever `answer` holds
struct Gauge {
    core: SyncCore,
    answer: Value,
    readings: Vec<(i64, i64)>,
}

impl Gauge {
    fn new(answer: Value) -> Shared<Self> {
        Rc::new(RefCell::new(Self {
            core: SyncCore::new("main"),
            answer,
            readings: Vec::new(),
        }))
    }
}

impl Reflect for Gauge {
    fn describe(&self) -> ClassDescriptor {
        ClassDescriptor::new("Gauge")
            .method_with(
                MethodDecl::new("requestReading", &[TypeTag::Int], |g: &mut Gauge, _| {
                    Ok(Some(g.answer.clone()))
                })
                .returns(TypeTag::Int),
            )
            .method(
                "receiveReading",
                &[TypeTag::Int, TypeTag::Int],
                |g: &mut Gauge, args| {
                    let channel = args[0].as_i64().unwrap_or_default();
                    let reading = args[1].as_i64().unwrap_or_default();
                    g.readings.push((channel, reading));
                    Ok(None)
                },
            )
    }
}

impl SyncableObject for Gauge {
    fn core(&self) -> &SyncCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SyncCore {
        &mut self.core
    }

    fn to_property_map(&self) -> PropertyMap {
        PropertyMap::new()
    }

    fn apply_property_map(&mut self, _properties: &PropertyMap) {}
}

fn request_reading(channel: i64) -> ProtocolMessage {
    ProtocolMessage::Sync {
        class_name: "Gauge".into(),
        instance_name: "main".into(),
        method_name: "requestReading".into(),
        args: vec![Value::Int(channel)],
    }
}

#[test]
fn test_return_value_must_match_declared_type() {
    let mut wire = Wire::connect();

    for answer in [Value::Invalid, Value::from("high"), Value::Bool(true)] {
        let gauge = Gauge::new(answer);
        wire.server.synchronize(&gauge).unwrap();
        wire.server.handle_message(wire.to_client, request_reading(1));
        assert!(take_messages(&mut wire.client_end).is_empty());
        assert!(wire.server.stop_synchronize(&gauge));
    }

    let server_gauge = Gauge::new(Value::Int(42));
    wire.server.synchronize(&server_gauge).unwrap();
    let client_gauge = Gauge::new(Value::Invalid);
    wire.client.synchronize(&client_gauge).unwrap();
    wire.pump();

    wire.server.handle_message(wire.to_client, request_reading(3));
    wire.pump();
    assert_eq!(client_gauge.borrow().readings, vec![(3, 42)]);
}

// ===== Outbound calls =====

#[test]
fn test_outbound_calls_respect_hub_mode() {
    let (mut wire, server, client) = synced_pair();

    // Wrong direction for each hub: nothing leaves
    server.borrow().core.request("requestSetVolume", vec![Value::Int(1)]);
    client.borrow().core.sync("setVolume", vec![Value::Int(1)]);
    wire.server.poll();
    wire.client.poll();

    assert!(take_messages(&mut wire.client_end).is_empty());
    assert!(take_messages(&mut wire.server_end).is_empty());

    server.borrow().core.sync("setVolume", vec![Value::Int(4)]);
    wire.server.poll();
    assert_eq!(
        take_messages(&mut wire.client_end),
        vec![sync("setVolume", vec![Value::Int(4)])]
    );
}

#[test]
fn test_outbound_call_to_unknown_method_or_with_invalid_args_is_not_sent() {
    let (mut wire, server, _client) = synced_pair();

    server.borrow().core.sync("setColor", vec![Value::Int(4)]);
    server.borrow().core.sync("setVolume", vec![Value::Invalid]);
    wire.server.poll();

    assert!(take_messages(&mut wire.client_end).is_empty());
}

#[test]
fn test_unsynchronized_object_sends_nothing() {
    let mut wire = Wire::connect();
    let loose = Settings::new("core");

    loose.borrow().core.sync("setVolume", vec![Value::Int(4)]);
    wire.server.poll();

    assert!(take_messages(&mut wire.client_end).is_empty());
}
