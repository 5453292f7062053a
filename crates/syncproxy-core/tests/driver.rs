//! Async driver: frames, heartbeat polling and cancellation

mod common;

use std::time::Duration;

use common::{take_messages, Settings, Wire};
use syncproxy_core::{drive, MemoryLink, PeerLink, ProtocolMessage, ProxyMode, SyncHub, Value};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_drive_completes_handshake() {
    let Wire {
        mut server,
        mut client,
        server_end,
        client_end,
        to_client,
        to_server,
    } = Wire::connect();

    let server_settings = Settings::new("core");
    server_settings.borrow_mut().volume = 11;
    server.synchronize(&server_settings).unwrap();
    let client_settings = Settings::new("core");
    client.synchronize(&client_settings).unwrap();

    let cancel = CancellationToken::new();
    let stopper = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    };

    tokio::join!(
        drive(&mut server, to_client, server_end.frames, cancel.clone()),
        drive(&mut client, to_server, client_end.frames, cancel.clone()),
        stopper,
    );

    let c = client_settings.borrow();
    assert!(c.core.is_initialized());
    assert_eq!(c.volume, 11);
}

#[tokio::test]
async fn test_drive_returns_when_stream_ends() {
    let mut hub = SyncHub::new(ProxyMode::Server);
    let (local, remote) = MemoryLink::pair();
    let peer = hub.add_peer(local.link.clone()).unwrap();

    let settings = Settings::new("core");
    hub.synchronize(&settings).unwrap();

    remote
        .link
        .borrow_mut()
        .dispatch(&ProtocolMessage::Sync {
            class_name: "Settings".into(),
            instance_name: "core".into(),
            method_name: "requestSetVolume".into(),
            args: vec![Value::Int(20)],
        })
        .unwrap();
    drop(remote);

    drive(&mut hub, peer, local.frames, CancellationToken::new()).await;

    assert_eq!(settings.borrow().volume, 20);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_tick_polls_the_hub() {
    let mut hub = SyncHub::new(ProxyMode::Server);
    hub.set_heartbeat_interval(Duration::from_millis(100));
    let (local, mut remote) = MemoryLink::pair();
    let peer = hub.add_peer(local.link.clone()).unwrap();

    let settings = Settings::new("core");
    hub.attach_event(&*settings.borrow(), "valueChanged", None).unwrap();
    settings.borrow_mut().set_volume(3);

    let cancel = CancellationToken::new();
    let stopper = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            cancel.cancel();
        }
    };
    tokio::join!(drive(&mut hub, peer, local.frames, cancel), stopper);

    assert_eq!(
        take_messages(&mut remote),
        vec![ProtocolMessage::RpcCall {
            wire_name: "valueChanged(int)".into(),
            args: vec![Value::Int(3)],
        }]
    );
}

#[tokio::test]
async fn test_cancelled_token_stops_immediately() {
    let mut hub = SyncHub::new(ProxyMode::Client);
    let (local, _remote) = MemoryLink::pair();
    let peer = hub.add_peer(local.link.clone()).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    drive(&mut hub, peer, local.frames, cancel).await;

    assert_eq!(hub.peer_count(), 1);
}
