use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::ids::{is_valid_participant_id, is_valid_session_id};
use crate::state::AppState;
use crate::ws::close::CloseReason;
use crate::ws::presence::ParticipantInfo;
use crate::ws::session::Outbound;

const PARTICIPANT_HEADER: &str = "x-participant-id";

/// How long a released socket may take to flush its queued frames
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters for the session socket
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Participant token from the join endpoint, required when tokens are enabled
    pub token: Option<String>,
    /// Self-declared participant id, used when tokens are disabled
    pub participant: Option<String>,
    pub name: Option<String>,
    pub color: Option<String>,
}

/// WebSocket upgrade handler for `/ws/:session_id`
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let participant_id = if is_valid_session_id(&session_id) {
        match resolve_participant(&state, &session_id, &query, &headers) {
            Ok(id) => id,
            Err(status) => return status.into_response(),
        }
    } else {
        // Rejected on the socket with its own close reason
        generated_participant_id()
    };

    let participant = ParticipantInfo {
        id: participant_id,
        display_name: query.name,
        color: query.color,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id, participant))
}

fn resolve_participant(
    state: &AppState,
    session_id: &str,
    query: &WsQuery,
    headers: &HeaderMap,
) -> Result<String, StatusCode> {
    if let Some(tokens) = &state.tokens {
        let Some(token) = query.token.as_deref() else {
            warn!("WebSocket connection rejected: missing participant token");
            return Err(StatusCode::UNAUTHORIZED);
        };
        return tokens.verify(token, session_id).map_err(|e| {
            warn!("WebSocket connection rejected: {}", e);
            StatusCode::UNAUTHORIZED
        });
    }

    let declared = query.participant.clone().or_else(|| {
        headers
            .get(PARTICIPANT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    });
    match declared {
        Some(id) if is_valid_participant_id(&id) => Ok(id),
        Some(id) => {
            warn!("WebSocket connection rejected: invalid participant id {:?}", id);
            Err(StatusCode::BAD_REQUEST)
        }
        None => Ok(generated_participant_id()),
    }
}

fn generated_participant_id() -> String {
    format!("p-{}", Uuid::new_v4().simple())
}

fn close_message(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: Cow::Borrowed(reason.as_str()),
    }))
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String, participant: ParticipantInfo) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

    let connection = match state.connections.accept(&session_id, participant, outbound_tx).await {
        Ok(connection) => connection,
        Err(reason) => {
            info!("WebSocket for session {} refused: {}", session_id, reason);
            let _ = ws_tx.send(close_message(reason)).await;
            return;
        }
    };

    // Frames queued by the relay go out in order; a close ends the writer
    let mut writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Frame(text) => {
                    if let Err(e) = ws_tx.send(Message::Text(text)).await {
                        debug!("WebSocket send failed: {}", e);
                        break;
                    }
                }
                Outbound::Close(reason) => {
                    let _ = ws_tx.send(close_message(reason)).await;
                    break;
                }
            }
        }
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            message = ws_rx.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !state.connections.on_frame(&connection, text) {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!(
                        "Ignoring {} byte binary frame from connection {} in session {}",
                        data.len(),
                        connection.id,
                        session_id
                    );
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Ping/pong are answered by axum
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket error on connection {}: {}", connection.id, e);
                    break;
                }
            },
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    state.connections.on_close(&connection).await;
    if !writer_done {
        // Detaching dropped the session's sender, so the writer ends once its queue is flushed
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
    }
}
