//! WebSocket transport for the hub

use super::PublishHub;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::StreamExt;
use futures::SinkExt;
use std::sync::Arc;

pub fn router(hub: Arc<PublishHub>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(hub)
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<PublishHub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn health(State(hub): State<Arc<PublishHub>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "subscribers": hub.subscriber_count(),
        "hasSnapshot": hub.has_snapshot(),
    }))
}

async fn handle_socket(socket: WebSocket, hub: Arc<PublishHub>) {
    let (mut sender, mut receiver) = socket.split();
    let subscription = hub.subscribe();
    let id = subscription.id;
    let mut outbound = subscription.receiver;

    // Hub queue -> socket. Ends when the hub drops this subscriber or the socket dies.
    let mut forward_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => hub.handle_client_message(id, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        log::debug!("WebSocket error for subscriber {}: {}", id, e);
                        break;
                    }
                    _ => {}
                }
            }
            _ = &mut forward_task => break,
        }
    }

    hub.unsubscribe(id);
    forward_task.abort();
}
