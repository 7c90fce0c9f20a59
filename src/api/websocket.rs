use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::error::SessionError;
use crate::session::{ClientMessage, RoomSessionController};

/// Runs one room socket until either side closes it.
///
/// Frames are handled one at a time, so a connection's messages are
/// processed in the order they were sent.
pub async fn handle_room_websocket(websocket: WebSocket, controller: Arc<RoomSessionController>) {
    let connection_id = Uuid::new_v4().to_string();
    tracing::info!(connection_id = %connection_id, "New room WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Spawn task to send messages to client
    let mut sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
            if closing {
                break;
            }
        }
    });

    controller.connect(&connection_id, tx).await;

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(message)) => handle_websocket_message(&controller, &connection_id, message).await,
                Some(Err(e)) => {
                    tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                    break;
                }
                None => break,
            },
            // The writer stops after a server-initiated close.
            _ = &mut sender_task => break,
        }
    }

    controller.disconnect(&connection_id).await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "Room WebSocket connection closed");
}

async fn handle_websocket_message(
    controller: &RoomSessionController,
    connection_id: &str,
    message: Message,
) {
    if message.is_close() || message.is_ping() || message.is_pong() {
        return;
    }

    let Ok(text) = message.to_str() else {
        controller
            .reject_malformed(connection_id, SessionError::InvalidMessage("expected a text frame".to_string()))
            .await;
        return;
    };

    tracing::debug!(connection_id = %connection_id, "Received room message: {}", text);

    match serde_json::from_str::<ClientMessage>(text) {
        Ok(client_message) => controller.handle_message(connection_id, client_message).await,
        Err(e) => {
            controller
                .reject_malformed(connection_id, SessionError::InvalidMessage(e.to_string()))
                .await
        }
    }
}
