//! WebSocket push stream: fans out `RuntimeEngine` `PushMessage`s to every
//! connected client via a broadcast channel, with a lightweight auth frame.

use crate::auth::TokenScope;
use crate::server::GatewayState;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use taskforge_core::engine::PushMessage;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Drains the engine's push-message channel and republishes onto a
/// broadcast channel so any number of WS clients can subscribe.
pub async fn relay_push_messages(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<PushMessage>,
    tx: broadcast::Sender<PushMessage>,
) {
    while let Some(msg) = rx.recv().await {
        let _ = tx.send(msg);
    }
}

#[derive(serde::Deserialize)]
struct AuthFrame {
    token: Option<String>,
}

pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut push_rx = state.push_tx.subscribe();

    let authenticated = match ws_rx.next().await {
        Some(Ok(WsMessage::Text(text))) => {
            let frame: Option<AuthFrame> = serde_json::from_str(&text).ok();
            let token = frame.and_then(|f| f.token);
            state.auth.verify_token(token.as_deref(), TokenScope::Read).is_ok()
        }
        _ => state.auth.verify_token(None, TokenScope::Read).is_ok(),
    };

    if !authenticated {
        let _ = ws_tx
            .send(WsMessage::Text(serde_json::json!({ "event": "auth", "ok": false }).to_string()))
            .await;
        return;
    }
    let _ = ws_tx.send(WsMessage::Text(serde_json::json!({ "event": "auth", "ok": true }).to_string())).await;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("gateway client disconnected");
                        return;
                    }
                    Some(Err(e)) => {
                        warn!("websocket error: {e}");
                        return;
                    }
                    _ => {}
                }
            }
            event = push_rx.recv() => {
                match event {
                    Ok(push) => {
                        let payload = serde_json::json!({ "event": "push", "data": push });
                        if let Ok(json) = serde_json::to_string(&payload) {
                            if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("gateway client lagged, dropped {n} push messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("push broadcast closed");
                        return;
                    }
                }
            }
        }
    }
}
