//! WebSocket signaling endpoint
//!
//! One socket carries one session. The read loop feeds text frames to the
//! session's [`Connection`]; a writer task drains replies and room
//! notifications onto the socket. Closing the socket, for any reason, runs
//! the connection's leave cleanup.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use parley_sfu::{Notifier, SessionId, SfuError};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::http::{AppError, AppState};
use crate::signaling::{Connection, ServerFrame};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Display name shown to other participants
    pub username: Option<String>,
}

/// Pick the display name for a new session
///
/// Absent names fall back to an anonymous one derived from the session id.
pub fn resolve_display_name(
    username: Option<&str>,
    session_id: &SessionId,
    max_len: usize,
) -> Result<String, SfuError> {
    let Some(raw) = username else {
        return Ok(session_id.anonymous_name());
    };

    let name = raw.trim();
    if name.is_empty() {
        return Err(SfuError::Validation("display name must not be blank".to_string()));
    }
    if name.chars().count() > max_len {
        return Err(SfuError::Validation(format!(
            "display name must be at most {max_len} characters"
        )));
    }
    Ok(name.to_string())
}

/// WebSocket handler for voice room signaling
///
/// Clients connect to <ws://host/ws?username={name}>
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let session_id = SessionId::generate();
    let display_name = resolve_display_name(
        query.username.as_deref(),
        &session_id,
        state.signaling.max_display_name_len,
    )?;

    Ok(ws
        .max_message_size(state.signaling.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, session_id, display_name)))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    session_id: SessionId,
    display_name: String,
) {
    info!(
        session_id = %session_id,
        display_name = %display_name,
        "WebSocket connection established"
    );

    // Bounded queues: notifications are dropped when full, replies wait
    let capacity = state.signaling.outbound_queue_capacity;
    let (notifier, mut events) = Notifier::channel(capacity);
    let (reply_tx, mut replies) = mpsc::channel::<ServerFrame>(capacity.max(1));

    let connection = Connection::new(
        state.registry.clone(),
        session_id.clone(),
        display_name,
        notifier,
        reply_tx,
    );

    // Split WebSocket into sender and receiver
    let (mut ws_sink, mut ws_stream) = socket.split();
    let shutdown = CancellationToken::new();

    // Spawn task to handle server frames -> WebSocket
    let writer_shutdown = shutdown.clone();
    let writer_session = session_id.clone();
    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                () = writer_shutdown.cancelled() => break,
                Some(frame) = replies.recv() => frame,
                Some(event) = events.recv() => ServerFrame::Event(event),
                else => break,
            };

            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    error!(session_id = %writer_session, error = %e, "Failed to encode frame");
                    continue;
                }
            };

            if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                warn!(session_id = %writer_session, error = %e, "Failed to send WebSocket message");
                writer_shutdown.cancel();
                break;
            }
        }
        if let Err(e) = ws_sink.close().await {
            debug!(session_id = %writer_session, error = %e, "WebSocket close failed");
        }
    });

    loop {
        let message = tokio::select! {
            () = shutdown.cancelled() => break,
            message = ws_stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => connection.handle_text(text.as_str()).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(session_id = %session_id, error = %e, "WebSocket receive error");
                break;
            }
            // Binary, ping and pong frames carry no signaling
            Some(Ok(_)) => {}
        }
    }

    connection.close().await;
    shutdown.cancel();
    if let Err(e) = writer.await {
        error!(session_id = %session_id, error = %e, "WebSocket writer task failed");
    }

    info!(session_id = %session_id, "WebSocket connection closed");
}
