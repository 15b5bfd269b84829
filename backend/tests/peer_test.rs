//! End-to-end tests: peers joining a live registry over loopback

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, routing::get, Json, Router};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;

use udpchat_backend::{
    api::{AppState, Event},
    bridge::{start_bridge, BRIDGE_USERNAME},
    clocksync,
    config::{Config, PeerConfig},
    error::PeerError,
    membership::Peer,
    models::Member,
    registry::MemberRegistry,
};

const WAIT: Duration = Duration::from_secs(5);

fn setup_state() -> AppState {
    let config = Config {
        bridge_ip: "127.0.0.1".to_string(),
        bridge_port: 0,
        ..Config::default()
    };
    let registry = MemberRegistry::new(config.client_timeout()).shared();
    AppState::new(registry, config)
}

async fn serve(app: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

async fn start_clock_service() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(clocksync::serve(listener));
    port
}

async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn peer_config(username: &str, registry_port: u16, ntp_port: u16) -> PeerConfig {
    PeerConfig {
        ntp_host: "127.0.0.1".to_string(),
        ntp_port,
        registry_host: "127.0.0.1".to_string(),
        registry_port,
        username: username.to_string(),
        ip: "127.0.0.1".to_string(),
        port: 0,
        heartbeat_interval_ms: 60_000,
        clock_sync_timeout_ms: 2_000,
    }
}

#[tokio::test]
async fn test_second_peer_discovered_before_heartbeat() {
    let registry_port = serve(udpchat_backend::create_router(setup_state())).await;
    let ntp_port = start_clock_service().await;

    let mut alice = Peer::join(&peer_config("alice", registry_port, ntp_port)).await.unwrap();
    assert!(alice.cache().is_empty(), "first peer joins an empty registry");

    let bob = Peer::join(&peer_config("bob", registry_port, ntp_port)).await.unwrap();
    let bob_members = bob.cache().members();
    assert_eq!(bob_members.len(), 1);
    assert_eq!(bob_members[0].username, "alice");

    // bob's push-announce lands before any heartbeat
    let shown = timeout(WAIT, alice.receive_datagram()).await.unwrap().unwrap();
    assert!(shown.is_none());
    let bob_key = bob.local_key();
    assert!(alice.cache().contains(&bob_key.ip, bob_key.port));

    // the heartbeat snapshot agrees with what the announce already told us
    assert_eq!(alice.heartbeat().await.unwrap(), 1);
    assert!(alice.cache().contains(&bob_key.ip, bob_key.port));
}

#[tokio::test]
async fn test_chat_reaches_cached_members() {
    let registry_port = serve(udpchat_backend::create_router(setup_state())).await;
    let ntp_port = start_clock_service().await;

    let mut alice = Peer::join(&peer_config("alice", registry_port, ntp_port)).await.unwrap();
    let bob = Peer::join(&peer_config("bob", registry_port, ntp_port)).await.unwrap();

    // consume the announce
    timeout(WAIT, alice.receive_datagram()).await.unwrap().unwrap();

    assert_eq!(bob.send_chat("hello alice").await.unwrap(), 1);

    let chat = timeout(WAIT, alice.receive_datagram())
        .await
        .unwrap()
        .unwrap()
        .expect("chat line");
    assert_eq!(chat.from, "bob");
    assert_eq!(chat.message, "hello alice");
    assert_eq!(chat.offset, bob.offset());
}

#[tokio::test]
async fn test_garbage_datagram_is_discarded() {
    let registry_port = serve(udpchat_backend::create_router(setup_state())).await;
    let ntp_port = start_clock_service().await;

    let mut alice = Peer::join(&peer_config("alice", registry_port, ntp_port)).await.unwrap();
    let key = alice.local_key();

    let intruder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    intruder.send_to(b"{not json", (key.ip.as_str(), key.port)).await.unwrap();
    intruder
        .send_to(br#"{"hello":"world"}"#, (key.ip.as_str(), key.port))
        .await
        .unwrap();
    intruder
        .send_to(
            br#"{"from":"eve","to":"all","message":"still here","timestamp":1,"offset":0}"#,
            (key.ip.as_str(), key.port),
        )
        .await
        .unwrap();

    assert!(timeout(WAIT, alice.receive_datagram()).await.unwrap().unwrap().is_none());
    assert!(timeout(WAIT, alice.receive_datagram()).await.unwrap().unwrap().is_none());
    let chat = timeout(WAIT, alice.receive_datagram()).await.unwrap().unwrap().unwrap();
    assert_eq!(chat.message, "still here");
    assert!(alice.cache().is_empty());
}

#[tokio::test]
async fn test_join_aborts_without_clock_service() {
    let registry_port = serve(udpchat_backend::create_router(setup_state())).await;
    let ntp_port = unused_port().await;

    let result = Peer::join(&peer_config("alice", registry_port, ntp_port)).await;
    assert!(matches!(result, Err(PeerError::ClockSync(_))));
}

#[tokio::test]
async fn test_unreachable_registry_is_retried_on_heartbeat() {
    let ntp_port = start_clock_service().await;
    let registry_port = unused_port().await;

    let mut alice = Peer::join(&peer_config("alice", registry_port, ntp_port)).await.unwrap();
    assert!(alice.cache().is_empty());

    let err = alice.heartbeat().await.unwrap_err();
    assert!(matches!(err, PeerError::Transport(_)));
}

#[tokio::test]
async fn test_rejected_heartbeat_keeps_previous_cache() {
    let accept = Arc::new(AtomicBool::new(true));
    let toggle = accept.clone();
    let app = Router::new().route(
        "/register",
        get(move || {
            let accept = toggle.clone();
            async move {
                if accept.load(Ordering::SeqCst) {
                    Ok(Json(vec![Member::new("carol", "127.0.0.1", 9, 1)]))
                } else {
                    Err(StatusCode::SERVICE_UNAVAILABLE)
                }
            }
        }),
    );
    let registry_port = serve(app).await;
    let ntp_port = start_clock_service().await;

    let mut alice = Peer::join(&peer_config("alice", registry_port, ntp_port)).await.unwrap();
    assert_eq!(alice.cache().len(), 1);

    accept.store(false, Ordering::SeqCst);
    let err = alice.heartbeat().await.unwrap_err();
    assert!(matches!(err, PeerError::Rejected { status: 503, .. }));
    assert_eq!(alice.cache().len(), 1);
    assert!(alice.cache().contains("127.0.0.1", 9));
}

#[tokio::test]
async fn test_run_loop_displays_chat_and_stops_when_input_closes() {
    let registry_port = serve(udpchat_backend::create_router(setup_state())).await;
    let ntp_port = start_clock_service().await;

    let alice = Peer::join(&peer_config("alice", registry_port, ntp_port)).await.unwrap();
    let bob = Peer::join(&peer_config("bob", registry_port, ntp_port)).await.unwrap();

    let (outgoing_tx, outgoing_rx) = mpsc::channel(4);
    let (display_tx, mut display_rx) = mpsc::channel(4);
    let running = tokio::spawn(alice.run(outgoing_rx, display_tx));

    bob.send_chat("over the loop").await.unwrap();
    let chat = timeout(WAIT, display_rx.recv()).await.unwrap().unwrap();
    assert_eq!(chat.from, "bob");
    assert!(chat.display_line().ends_with("bob: over the loop"));

    drop(outgoing_tx);
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_bridge_is_permanent_member_and_receives_chat() {
    let state = setup_state();
    let mut events = state.event_tx.subscribe();
    start_bridge(&state).await.unwrap();

    let registry_port = serve(udpchat_backend::create_router(state.clone())).await;
    let ntp_port = start_clock_service().await;

    let alice = Peer::join(&peer_config("alice", registry_port, ntp_port)).await.unwrap();
    let members = alice.cache().members();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].username, BRIDGE_USERNAME);
    assert!(members[0].is_permanent());

    // the announce is ignored by the bridge, the chat is republished
    alice.send_chat("to the browsers").await.unwrap();
    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    let raw = match event {
        Event::Chat(raw) => raw,
        other => panic!("expected chat event, got {:?}", other),
    };
    assert!(raw.contains("to the browsers"));

    let registry = state.registry.read().await;
    assert!(registry.snapshot().iter().any(|m| m.username == "alice"));
    assert_eq!(registry.len(), 2);
}
