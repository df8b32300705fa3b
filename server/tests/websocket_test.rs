//! End-to-end tests for the WebSocket hub.
//!
//! Each test serves the real router on an ephemeral port and connects
//! `tokio-tungstenite` clients to `/ws`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use posthub_server::auth::{default_token_ttl, JwtAuthenticator};
use posthub_server::config::Config;
use posthub_server::hub::{ConnectionId, Hub, HubConfig};
use posthub_server::routes::{create_router, AppState};

const SECRET: &str = "websocket-test-secret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Helpers
// ============================================================================

async fn spawn_server() -> (SocketAddr, AppState) {
    spawn_server_with(Config::with_secret(SECRET)).await
}

async fn spawn_server_with(config: Config) -> (SocketAddr, AppState) {
    let (hub, _actor) = Hub::spawn(HubConfig::default());
    let state = AppState::new(config, hub);
    let app = create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, response) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    ws
}

fn local_addr(client: &Client) -> SocketAddr {
    match client.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.local_addr().unwrap(),
        _ => panic!("expected a plain TCP stream"),
    }
}

async fn wait_for_connections(state: &AppState, expected: usize) {
    for _ in 0..200 {
        if state.hub.len().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} connections, hub has {}",
        state.hub.len().await
    );
}

async fn id_of(state: &AppState, client: &Client) -> ConnectionId {
    let addr = local_addr(client);
    state
        .hub
        .members()
        .await
        .iter()
        .find(|connection| connection.peer_addr() == addr)
        .and_then(|connection| connection.id())
        .expect("client is not a hub member")
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let message = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection ended")
            .expect("websocket error");

        match message {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn assert_no_text(client: &mut Client) {
    if let Ok(Some(Ok(Message::Text(text)))) =
        timeout(Duration::from_millis(200), client.next()).await
    {
        panic!("unexpected message: {text}");
    }
}

async fn create_post(state: &AppState, user: &str, content: &str) -> Value {
    let token = JwtAuthenticator::new(SECRET.as_bytes())
        .issue(user, default_token_ttl())
        .unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/posts")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "post_content": content }).to_string()))
        .unwrap();

    let response = create_router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn each_client_is_admitted_once() {
    let (addr, state) = spawn_server().await;

    let a = connect(addr).await;
    let b = connect(addr).await;
    wait_for_connections(&state, 2).await;

    let a_id = id_of(&state, &a).await;
    let b_id = id_of(&state, &b).await;
    assert_ne!(a_id, b_id);
}

#[tokio::test]
async fn plain_http_request_to_ws_is_rejected() {
    let (addr, state) = spawn_server().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET /ws HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    tokio::io::AsyncWriteExt::write_all(&mut stream, request.as_bytes())
        .await
        .unwrap();

    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 500"), "got: {response}");
    assert!(state.hub.is_empty().await);
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn broadcast_skips_excluded_client() {
    let (addr, state) = spawn_server().await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    wait_for_connections(&state, 3).await;

    let b_id = id_of(&state, &b).await;
    let report = state
        .broadcaster
        .broadcast(&json!({"id": "p1", "post_content": "hi"}), Some(b_id))
        .await
        .unwrap();
    assert_eq!(report.delivered, 2);

    let expected = r#"{"id":"p1","post_content":"hi"}"#;
    assert_eq!(next_text(&mut a).await, expected);
    assert_eq!(next_text(&mut c).await, expected);
    assert_no_text(&mut b).await;
}

#[tokio::test]
async fn created_post_reaches_every_client() {
    let (addr, state) = spawn_server().await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_connections(&state, 2).await;

    let created = create_post(&state, "author", "hello everyone").await;

    for client in [&mut a, &mut b] {
        let received: Value = serde_json::from_str(&next_text(client).await).unwrap();
        assert_eq!(received, created);
        assert_eq!(received["post_content"], "hello everyone");
    }
}

#[tokio::test]
async fn messages_arrive_in_broadcast_order() {
    let (addr, state) = spawn_server().await;

    let mut client = connect(addr).await;
    wait_for_connections(&state, 1).await;

    for n in 0..5 {
        state.broadcaster.broadcast(&json!(n), None).await.unwrap();
    }
    for n in 0..5 {
        assert_eq!(next_text(&mut client).await, n.to_string());
    }
}

#[tokio::test]
async fn inbound_frames_are_ignored() {
    let (addr, state) = spawn_server().await;

    let mut client = connect(addr).await;
    wait_for_connections(&state, 1).await;

    client.send(Message::text("hello server")).await.unwrap();
    assert_no_text(&mut client).await;
    assert_eq!(state.hub.len().await, 1);
}

// ============================================================================
// Disconnect detection
// ============================================================================

#[tokio::test]
async fn closed_client_is_removed() {
    let (addr, state) = spawn_server().await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_connections(&state, 2).await;
    let b_id = id_of(&state, &b).await;

    a.close(None).await.unwrap();
    wait_for_connections(&state, 1).await;

    let members = state.hub.members().await;
    assert_eq!(members[0].id(), Some(b_id));

    state.broadcaster.broadcast(&json!("still here"), None).await.unwrap();
    assert_eq!(next_text(&mut b).await, r#""still here""#);
}

#[tokio::test]
async fn dropped_transport_is_removed() {
    let (addr, state) = spawn_server().await;

    let client = connect(addr).await;
    wait_for_connections(&state, 1).await;

    drop(client);
    wait_for_connections(&state, 0).await;
}

#[tokio::test]
async fn server_side_close_sends_close_frame() {
    let (addr, state) = spawn_server().await;

    let mut client = connect(addr).await;
    wait_for_connections(&state, 1).await;

    let members = state.hub.members().await;
    members[0].close();

    let frame = timeout(Duration::from_secs(2), client.next())
        .await
        .expect("timed out waiting for close");
    assert!(
        matches!(frame, Some(Ok(Message::Close(_))) | None),
        "expected close, got {frame:?}"
    );
    wait_for_connections(&state, 0).await;
}

#[tokio::test]
async fn client_that_stops_reading_is_disconnected() {
    let mut config = Config::with_secret(SECRET);
    config.send_queue_capacity = 2;
    let (addr, state) = spawn_server_with(config).await;

    // Never polled, so the server's writes eventually block.
    let _stuck = connect(addr).await;
    wait_for_connections(&state, 1).await;
    let connection = Arc::downgrade(&state.hub.members().await[0]);

    let large = "x".repeat(256 * 1024);
    let mut overflowed = false;
    for _ in 0..500 {
        let report = state.broadcaster.broadcast(&large, None).await.unwrap();
        if report.overflowed + report.closed > 0 {
            overflowed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(overflowed, "queue never overflowed");

    wait_for_connections(&state, 0).await;

    // Both connection tasks have finished once nothing holds the handle.
    for _ in 0..200 {
        if connection.upgrade().is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("connection tasks are still running after disconnect");
}
