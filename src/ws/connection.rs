//! Per-socket read/write loop.
//!
//! The writer half drains the connection's outbound queue; the reader half
//! feeds text frames to the [`ConnectionManager`]. Whichever half stops
//! first ends the connection.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::manager::ConnectionManager;
use super::messages::WsMessage;
use super::registry::Outbound;
use crate::error::GatewayError;

/// Runs a single WebSocket connection until either side closes it.
///
/// When `token` is present (from the `?token=` query parameter) the
/// connection authenticates immediately instead of waiting for an `auth`
/// frame.
pub async fn run_connection(
    socket: WebSocket,
    manager: Arc<ConnectionManager>,
    token: Option<String>,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (id, outbound) = manager.accept().await;
    let mut writer = tokio::spawn(write_loop(ws_tx, outbound));

    if let Some(token) = token.filter(|t| !t.is_empty()) {
        // Failure already produced auth_failed and a close frame.
        let _ = manager.authenticate(id, &token).await;
    }

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        manager.handle_text(id, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let err = GatewayError::Protocol("binary frames are not supported".to_string());
                        manager.send_to(id, WsMessage::error(&err)).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        let _ = manager.registry().touch(id, Instant::now()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %id, error = %e, "ws read error");
                        break;
                    }
                }
            }
            _ = &mut writer => break,
        }
    }

    manager.disconnect(id, "socket closed").await;
    writer.abort();
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(msg) => {
                let json = match msg.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode outbound frame");
                        continue;
                    }
                };
                if ws_tx.send(Message::text(json)).await.is_err() {
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}
