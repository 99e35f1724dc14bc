//! Chat WebSocket handler.
//!
//! One connection joins one room, named in the request path. The reader half
//! decodes inbound frames and hands them to the router; a separate writer task
//! replays room history and then forwards everything the hub queues for the
//! connection.
//!
//! Both halves stop as soon as the hub drops the connection. An evicted
//! connection's writer abandons its pending write instead of waiting on a
//! client that no longer reads.

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, error, warn};

use crate::chat::{ChatHub, ChatMessage, ConnectionId, JoinedConnection};
use crate::RelayError;

use super::AppState;

/// How long a closing handshake may take before the transport is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket chat handler.
///
/// GET /websocket/{room}
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room))
}

/// Handle an upgraded connection until either side closes it.
async fn handle_socket(mut socket: WebSocket, state: AppState, room: String) {
    let joined = match state.hub.join(&room).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!(%room, error = %e, "Rejecting connection");
            let _ = SinkExt::close(&mut socket).await;
            return;
        }
    };

    let id = joined.id;
    let room = joined.room.clone();
    let mut removal = joined.removal_signal();

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(state.hub.clone(), sink, joined));

    loop {
        let frame = tokio::select! {
            biased;
            _ = removal.removed() => {
                debug!(connection = id, "Connection dropped by hub");
                break;
            }
            frame = stream.next() => frame,
        };

        let payload = match frame {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(_))) | None => {
                debug!(connection = id, "WebSocket closed by client");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(connection = id, error = %e, "WebSocket read error");
                break;
            }
        };

        let mut msg = match ChatMessage::from_bytes(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(connection = id, error = %e, "Dropping undecodable frame");
                continue;
            }
        };
        // A connection only ever speaks in the room it joined.
        msg.room.clone_from(&room);
        msg.ensure_timestamp();

        match state.router.route(msg).await {
            Ok(routed) => debug!(connection = id, ?routed, "Routed message"),
            Err(RelayError::MalformedCommand(detail)) => {
                debug!(connection = id, %detail, "Malformed command");
                let notice = state.router.usage_notice(&room);
                if let Err(e) = state.hub.send_to(id, notice).await {
                    debug!(error = %e, "Could not deliver usage notice");
                }
            }
            Err(e) => error!(connection = id, %room, error = %e, "Failed to route message"),
        }
    }

    state.hub.leave(id).await;
    if let Err(e) = writer.await {
        error!(connection = id, error = %e, "Writer task failed");
    }
    debug!(connection = id, %room, "WebSocket session ended");
}

/// Send replay, then live traffic, until the hub drops the connection.
async fn write_loop(
    hub: Arc<ChatHub>,
    mut sink: SplitSink<WebSocket, Message>,
    mut joined: JoinedConnection,
) {
    let id = joined.id;
    let mut removal = joined.removal_signal();

    let result = tokio::select! {
        biased;
        _ = removal.evicted() => {
            // The sink goes away with any half-written frame; the reader
            // drops the other half, which closes the socket.
            debug!(connection = id, "Dropping transport of evicted connection");
            return;
        }
        result = forward(&mut sink, &mut joined) => result,
    };

    if let Err(e) = result {
        if is_benign_close(&e) {
            debug!(connection = id, error = %e, "Connection closed during write");
        } else {
            let err = RelayError::Write {
                connection: id,
                reason: e.to_string(),
            };
            warn!(error = %err, "Removing connection after failed write");
        }
        hub.leave(id).await;
    }

    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
}

async fn forward(
    sink: &mut SplitSink<WebSocket, Message>,
    joined: &mut JoinedConnection,
) -> Result<(), axum::Error> {
    for msg in std::mem::take(&mut joined.replay) {
        send_message(sink, joined.id, &msg).await?;
    }
    while let Some(msg) = joined.recv().await {
        send_message(sink, joined.id, &msg).await?;
    }
    Ok(())
}

async fn send_message(
    sink: &mut SplitSink<WebSocket, Message>,
    id: ConnectionId,
    msg: &ChatMessage,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(e) => {
            error!(connection = id, error = %e, "Failed to encode message, skipping");
            return Ok(());
        }
    };
    sink.send(Message::Text(text)).await
}

/// Whether a write failed only because the peer had already gone away.
fn is_benign_close(e: &axum::Error) -> bool {
    let mut source = Some(e as &(dyn StdError + 'static));
    while let Some(err) = source {
        if let Some(ws) = err.downcast_ref::<WsError>() {
            match ws {
                WsError::ConnectionClosed | WsError::AlreadyClosed => return true,
                WsError::Io(io_err) => return is_disconnect(io_err.kind()),
                _ => {}
            }
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return is_disconnect(io_err.kind());
        }
        source = err.source();
    }
    false
}

fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}
