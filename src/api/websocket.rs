use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use super::AppState;
use crate::session::{ClientMessage, EventSender, ServerEvent, SignalingHandler};

pub async fn handle_classroom_websocket(websocket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) =
        mpsc::channel::<ServerEvent>(state.config.session.outbound_queue_capacity);

    let mut handler = SignalingHandler::new(
        state.registry.clone(),
        state.scheduler.clone(),
        state.clock.clone(),
        tx.clone(),
    );
    let connection_id = handler.connection_id().to_string();
    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    // Socket writes happen here, off the room locks
    let writer_connection_id = connection_id.clone();
    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server event");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::text(text)).await {
                tracing::warn!(
                    connection_id = %writer_connection_id,
                    error = %e,
                    "Failed to send WebSocket message"
                );
                break;
            }
        }
    });

    let mut clean_close = true;
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                handle_websocket_message(&mut handler, &tx, message).await;
            }
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                clean_close = false;
                break;
            }
        }
    }

    handler.cleanup(clean_close).await;
    drop(handler);
    drop(tx);
    // Flush what is already queued, then stop
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), sender_task).await;
    tracing::info!(connection_id = %connection_id, clean = clean_close, "WebSocket connection closed");
}

async fn handle_websocket_message(
    handler: &mut SignalingHandler,
    tx: &EventSender,
    message: Message,
) {
    let Ok(text) = message.to_str() else {
        // Pings, pongs and binary frames still prove the peer is alive
        handler.touch();
        return;
    };
    tracing::debug!(raw_message = %text, "Received client message");

    match serde_json::from_str::<ClientMessage>(text) {
        Ok(client_message) => handler.handle_message(client_message).await,
        Err(e) => {
            tracing::warn!(error = %e, raw_message = %text, "Failed to parse client message");
            let _ = tx.try_send(ServerEvent::Error {
                code: "invalid-message".to_string(),
                message: e.to_string(),
            });
        }
    }
}
