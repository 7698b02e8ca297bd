//! Live thread connection over WebSocket
//!
//! GET /chat/ws/{thread_id}
//!
//! The token comes from `Authorization: Bearer` or the `token` query
//! parameter (browsers cannot set headers on a WebSocket). Handshake
//! failures close with 1008 before anything is registered.
//!
//! Frames sent to the client:
//!   {"type":"history","thread_id":..,"messages":[..]}   once, after registration
//!   {"type":"message","thread_id":..,"message":{..}}     message from the other side
//!   {"type":"ack","message":{..}}                        own message stored
//!   {"type":"error","message":".."}                      rejected client frame
//!
//! Frames accepted from the client: {"text":".."}

use crate::auth::middleware::bearer_token;
use crate::auth::IdentityProvider;
use crate::config::AppState;
use crate::error::{ChatError, Result};
use crate::models::{Identity, Message, Thread, ThreadId};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    History {
        thread_id: ThreadId,
        messages: Vec<Message>,
    },
    Message {
        thread_id: ThreadId,
        message: Message,
    },
    Ack {
        message: Message,
    },
    Error {
        message: String,
    },
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = match bearer_token(&headers) {
        Ok(Some(token)) => Some(token.to_string()),
        Ok(None) => params.token,
        Err(_) => None,
    };
    ws.on_upgrade(move |socket| handle_socket(state, thread_id, token, socket))
}

/// Authenticate the caller and confirm they take part in the thread.
pub async fn authorize(
    state: &AppState,
    raw_thread_id: &str,
    token: Option<&str>,
) -> Result<(Identity, Thread)> {
    let token = token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ChatError::Auth("no auth token found".into()))?;
    let identity = state.auth.verify(token).await?;
    let thread_id = ThreadId::parse(raw_thread_id)?;
    let thread = state
        .chat
        .participant_thread(thread_id, &identity.user_id)
        .await?;
    Ok((identity, thread))
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: String) {
    let _ = socket
        .send(WsMessage::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> std::result::Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(json) => socket.send(WsMessage::Text(json.into())).await,
        Err(e) => {
            error!("Failed to encode frame: {}", e);
            Ok(())
        }
    }
}

async fn handle_socket(
    state: AppState,
    raw_thread_id: String,
    token: Option<String>,
    mut socket: WebSocket,
) {
    let (identity, thread) = match authorize(&state, &raw_thread_id, token.as_deref()).await {
        Ok(authorized) => authorized,
        Err(e) => {
            warn!(thread = %raw_thread_id, "WebSocket handshake rejected: {}", e);
            close_with(&mut socket, close_code::POLICY, e.public_message()).await;
            return;
        }
    };
    let thread_id = thread.thread_id;
    let user_id = identity.user_id;

    // Register before loading history so nothing published in between is lost.
    let mut registration = match state.registry.register(thread_id, &user_id).await {
        Ok(registration) => registration,
        Err(e) => {
            error!(thread_id = %thread_id, "Failed to register connection: {}", e);
            close_with(&mut socket, close_code::ERROR, "live delivery unavailable".into()).await;
            return;
        }
    };

    let history = match state.chat.list_messages(thread_id, &user_id).await {
        Ok(history) => history,
        Err(e) => {
            error!(thread_id = %thread_id, "Failed to load history: {}", e);
            close_with(&mut socket, close_code::ERROR, e.public_message()).await;
            return;
        }
    };
    // Live events at or below this seq are already part of the history.
    let history_seq = history.last().map(|m| m.seq).unwrap_or(0);

    info!(thread_id = %thread_id, user = %user_id, connection = registration.id, "WebSocket connected");
    let frame = ServerFrame::History {
        thread_id,
        messages: history,
    };
    if send_frame(&mut socket, &frame).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(thread_id = %thread_id, "WebSocket receive error: {}", e);
                        break;
                    }
                };

                let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(frame) => match state.chat.send_message(thread_id, &user_id, &frame.text).await {
                        Ok(message) => ServerFrame::Ack { message },
                        Err(e) => ServerFrame::Error { message: e.public_message() },
                    },
                    Err(_) => ServerFrame::Error {
                        message: "expected a JSON object with a text field".into(),
                    },
                };
                if send_frame(&mut socket, &reply).await.is_err() {
                    break;
                }
            }
            event = registration.events.recv() => {
                let Some(event) = event else {
                    // registry dropped us: shutdown or lost relay
                    close_with(&mut socket, close_code::AWAY, "server closing connection".into()).await;
                    break;
                };
                if event.message.seq <= history_seq {
                    continue;
                }
                let frame = ServerFrame::Message {
                    thread_id: event.thread_id,
                    message: event.message,
                };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(thread_id = %thread_id, user = %user_id, connection = registration.id, "WebSocket disconnected");
}
