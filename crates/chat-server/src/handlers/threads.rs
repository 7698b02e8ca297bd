//! Thread handlers

use crate::config::AppState;
use crate::ctx::Ctx;
use crate::error::Result;
use crate::models::{Message, PropertyId, ThreadId, ThreadView};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub thread_id: ThreadId,
    pub marked: u64,
}

/// GET /chat/property/{property_id}
///
/// Opens the caller's thread with the property owner, creating it on
/// first contact, and returns the full history.
pub async fn open_thread(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(property_id): Path<String>,
) -> Result<Json<ThreadView>> {
    info!("GET /chat/property/{} - {}", property_id, ctx.user_id());
    let property_id = PropertyId::parse(&property_id)?;
    let view = state.chat.open_thread(property_id, ctx.user_id()).await?;
    Ok(Json(view))
}

/// GET /chat/threads/{thread_id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(thread_id): Path<String>,
) -> Result<Json<Vec<Message>>> {
    let thread_id = ThreadId::parse(&thread_id)?;
    let messages = state.chat.list_messages(thread_id, ctx.user_id()).await?;
    Ok(Json(messages))
}

/// POST /chat/threads/{thread_id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(thread_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>)> {
    let thread_id = ThreadId::parse(&thread_id)?;
    let message = state
        .chat
        .send_message(thread_id, ctx.user_id(), &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /chat/mark-read/{thread_id}
pub async fn mark_read(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(thread_id): Path<String>,
) -> Result<Json<MarkReadResponse>> {
    let thread_id = ThreadId::parse(&thread_id)?;
    let marked = state.chat.mark_thread_read(thread_id, ctx.user_id()).await?;
    Ok(Json(MarkReadResponse { thread_id, marked }))
}
