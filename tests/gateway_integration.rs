//! End-to-end tests against a gateway bound to an ephemeral port.
//!
//! WebSocket clients use `tokio-tungstenite`, REST calls use `reqwest`.
#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use relay_gateway::app_state::{AppState, StateParts};
use relay_gateway::build_app;
use relay_gateway::identity::StaticTokenResolver;
use relay_gateway::persistence::InMemoryEventLog;
use relay_gateway::ws::ConnectionSettings;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_gateway() -> (SocketAddr, AppState) {
    let state = AppState::build(StateParts {
        event_log: Arc::new(InMemoryEventLog::new()),
        log_events: true,
        identity: Arc::new(StaticTokenResolver::parse("alice-token=alice,bob-token=bob")),
        settings: ConnectionSettings::default(),
        handler_timeout: Duration::from_secs(1),
    })
    .await;

    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("failed to bind test listener");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("listener has no local address");
    };
    let app = build_app(state.clone(), Duration::from_secs(5));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, state)
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{addr}/ws{query}");
    let Ok((client, _)) = connect_async(url).await else {
        panic!("websocket connect failed");
    };
    client
}

/// Next server message, or `None` once the server closed the socket.
async fn next_frame(client: &mut Client) -> Option<Message> {
    let Ok(frame) = tokio::time::timeout(Duration::from_secs(2), client.next()).await else {
        panic!("timed out waiting for a frame");
    };
    frame.and_then(Result::ok)
}

/// Next JSON text frame, skipping transport-level frames.
async fn next_json(client: &mut Client) -> Value {
    loop {
        match next_frame(client).await {
            Some(Message::Text(text)) => {
                let Ok(value) = serde_json::from_str(text.as_str()) else {
                    panic!("server sent invalid JSON: {text}");
                };
                return value;
            }
            Some(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    if client.send(Message::text(value.to_string())).await.is_err() {
        panic!("send failed");
    }
}

async fn authenticated(addr: SocketAddr, token: &str) -> Client {
    let mut client = connect(addr, "").await;
    assert_eq!(next_json(&mut client).await["type"], "welcome");
    send_json(&mut client, json!({"type": "auth", "payload": {"token": token}})).await;
    assert_eq!(next_json(&mut client).await["type"], "auth_success");
    client
}

async fn join(client: &mut Client, channel: &str) {
    send_json(client, json!({"type": "join_room", "room": channel})).await;
    let reply = next_json(client).await;
    assert_eq!(reply["type"], "subscribed");
    assert_eq!(reply["payload"]["channel"], channel);
}

#[tokio::test]
async fn welcome_then_auth_success() {
    let (addr, _state) = spawn_gateway().await;
    let mut client = connect(addr, "").await;

    let welcome = next_json(&mut client).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["payload"]["connection_id"].is_string());

    send_json(&mut client, json!({"type": "auth", "payload": {"token": "alice-token"}})).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "auth_success");
    assert_eq!(reply["payload"]["user_id"], "alice");
    assert_eq!(reply["payload"]["channel"], "user:alice");
}

#[tokio::test]
async fn query_token_authenticates_on_upgrade() {
    let (addr, state) = spawn_gateway().await;
    let mut client = connect(addr, "?token=bob-token").await;
    assert_eq!(next_json(&mut client).await["type"], "welcome");
    assert_eq!(next_json(&mut client).await["type"], "auth_success");
    assert_eq!(state.connections.stats().await.authenticated, 1);
}

#[tokio::test]
async fn invalid_token_is_closed_with_4001() {
    let (addr, _state) = spawn_gateway().await;
    let mut client = connect(addr, "").await;
    assert_eq!(next_json(&mut client).await["type"], "welcome");

    send_json(&mut client, json!({"type": "auth", "payload": {"token": "forged"}})).await;
    assert_eq!(next_json(&mut client).await["type"], "auth_failed");

    let Some(Message::Close(Some(frame))) = next_frame(&mut client).await else {
        panic!("expected a close frame");
    };
    assert_eq!(u16::from(frame.code), 4001);
}

#[tokio::test]
async fn unauthenticated_join_is_rejected() {
    let (addr, _state) = spawn_gateway().await;
    let mut client = connect(addr, "").await;
    assert_eq!(next_json(&mut client).await["type"], "welcome");

    send_json(&mut client, json!({"type": "join_room", "room": "room:1"})).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["code"], "not_authenticated");
}

#[tokio::test]
async fn chat_is_relayed_between_channel_members() {
    let (addr, _state) = spawn_gateway().await;
    let mut alice = authenticated(addr, "alice-token").await;
    let mut bob = authenticated(addr, "bob-token").await;

    join(&mut alice, "room:1").await;
    join(&mut bob, "room:1").await;
    let presence = next_json(&mut alice).await;
    assert_eq!(presence["type"], "room_state");
    assert_eq!(presence["payload"]["action"], "joined");
    assert_eq!(presence["payload"]["user_id"], "bob");

    send_json(
        &mut bob,
        json!({"type": "chat_message", "room": "room:1", "payload": {"text": "hello"}}),
    )
    .await;
    let chat = next_json(&mut alice).await;
    assert_eq!(chat["type"], "chat_message");
    assert_eq!(chat["sender"], "bob");
    assert_eq!(chat["payload"]["text"], "hello");
}

#[tokio::test]
async fn emitted_events_reach_channel_and_user() {
    let (addr, _state) = spawn_gateway().await;
    let mut alice = authenticated(addr, "alice-token").await;
    let mut bob = authenticated(addr, "bob-token").await;
    join(&mut alice, "project:1").await;

    let http = reqwest::Client::new();
    let Ok(resp) = http
        .post(format!("http://{addr}/api/v1/events"))
        .json(&json!({
            "name": "task.created",
            "source": "tasks",
            "scope": "project:1",
            "payload": {"id": "t1"}
        }))
        .send()
        .await
    else {
        panic!("emit request failed");
    };
    assert_eq!(resp.status().as_u16(), 201);

    let frame = next_json(&mut alice).await;
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["channel"], "project:1");
    assert_eq!(frame["payload"]["name"], "task.created");
    assert_eq!(frame["payload"]["data"]["id"], "t1");

    let Ok(resp) = http
        .post(format!("http://{addr}/api/v1/events"))
        .json(&json!({
            "name": "notification.mention",
            "source": "chat",
            "user_id": "bob"
        }))
        .send()
        .await
    else {
        panic!("emit request failed");
    };
    assert_eq!(resp.status().as_u16(), 201);
    assert_eq!(next_json(&mut bob).await["type"], "notification");
}

#[tokio::test]
async fn wildcard_event_names_are_rejected() {
    let (addr, _state) = spawn_gateway().await;
    let Ok(resp) = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/events"))
        .json(&json!({"name": "task.*", "source": "tasks"}))
        .send()
        .await
    else {
        panic!("emit request failed");
    };
    assert_eq!(resp.status().as_u16(), 409);
}

#[tokio::test]
async fn batch_emission_and_history() {
    let (addr, _state) = spawn_gateway().await;
    let http = reqwest::Client::new();

    let Ok(resp) = http
        .post(format!("http://{addr}/api/v1/events/batch"))
        .json(&json!({"events": [
            {"name": "a.one", "source": "test"},
            {"name": "bad..name", "source": "test"},
            {"name": "a.two", "source": "test"}
        ]}))
        .send()
        .await
    else {
        panic!("batch request failed");
    };
    let Ok(body) = resp.json::<Value>().await else {
        panic!("batch response was not JSON");
    };
    assert_eq!(body["submitted"], 3);
    assert_eq!(body["emitted"], 2);

    // Persistence runs in the background.
    let mut names = Vec::new();
    for _ in 0..20 {
        let Ok(resp) = http
            .get(format!("http://{addr}/api/v1/events?limit=10"))
            .send()
            .await
        else {
            panic!("history request failed");
        };
        let Ok(history) = resp.json::<Value>().await else {
            panic!("history response was not JSON");
        };
        if history["count"] == 2 {
            names = history["data"]
                .as_array()
                .map(|rows| rows.iter().map(|r| r["name"].clone()).collect())
                .unwrap_or_default();
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(names, vec![json!("a.two"), json!("a.one")]);
}

#[tokio::test]
async fn health_stats_and_channels() {
    let (addr, _state) = spawn_gateway().await;
    let mut alice = authenticated(addr, "alice-token").await;
    join(&mut alice, "room:lobby").await;

    let Ok(health) = reqwest::get(format!("http://{addr}/health")).await else {
        panic!("health request failed");
    };
    assert!(health.status().is_success());

    let Ok(resp) = reqwest::get(format!("http://{addr}/api/v1/stats")).await else {
        panic!("stats request failed");
    };
    let Ok(stats) = resp.json::<Value>().await else {
        panic!("stats response was not JSON");
    };
    assert_eq!(stats["connections"]["connections"], 1);
    assert_eq!(stats["connections"]["authenticated"], 1);
    assert_eq!(stats["connections"]["users"], 1);

    let Ok(resp) = reqwest::get(format!("http://{addr}/api/v1/channels")).await else {
        panic!("channels request failed");
    };
    let Ok(channels) = resp.json::<Value>().await else {
        panic!("channels response was not JSON");
    };
    let Some(rows) = channels["data"].as_array() else {
        panic!("channels data missing");
    };
    assert!(
        rows.iter()
            .any(|r| r["name"] == "room:lobby" && r["members"] == 1)
    );
}

#[tokio::test]
async fn shutdown_closes_clients_with_1001() {
    let (addr, state) = spawn_gateway().await;
    let mut alice = authenticated(addr, "alice-token").await;

    assert_eq!(state.connections.shutdown().await, 1);
    let Some(Message::Close(Some(frame))) = next_frame(&mut alice).await else {
        panic!("expected a close frame");
    };
    assert_eq!(u16::from(frame.code), 1001);
}
