use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::RelayState;
use crate::registry::ConnectionRegistry;

/// Consumer WebSocket upgrade. Mounted on every path of the broadcast listener.
pub async fn consumer_websocket_handler(
    State(state): State<RelayState>,
    ws: WebSocketUpgrade,
) -> Response {
    let registry = state.registry.clone();
    let capacity = state.websocket.send_channel_capacity;
    ws.on_upgrade(move |socket| serve_consumer(socket, registry, capacity))
}

/// Run one consumer connection until the consumer leaves or its session
/// closes. The session is deregistered (timer stopped) before the socket is
/// dropped.
pub async fn serve_consumer(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    send_channel_capacity: usize,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending lines to the WebSocket
    let (tx, mut rx) = mpsc::channel::<String>(send_channel_capacity);
    let registration = registry.register(tx).await;
    let conn_id = registration.id;

    // Task to write queued lines to the WebSocket. Ending drops `rx`, which the
    // session observes as a closed consumer on its next tick.
    let sender_task = async move {
        while let Some(line) = rx.recv().await {
            if ws_sender.send(Message::Text(line.into())).await.is_err() {
                break;
            }
        }
    };

    // Consumers have nothing to say; watch only for the close.
    let receiver_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    tokio::pin!(sender_task);
    tokio::pin!(receiver_task);

    tokio::select! {
        _ = &mut sender_task => debug!(conn_id = %conn_id, "WebSocket write failed"),
        _ = &mut receiver_task => debug!(conn_id = %conn_id, "Consumer closed connection"),
        _ = registration.closed.cancelled() => debug!(conn_id = %conn_id, "Broadcast session closed"),
    }

    registry.deregister(&conn_id).await;
}
