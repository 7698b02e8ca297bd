//! Inbox and unread notification handlers

use crate::config::AppState;
use crate::ctx::Ctx;
use crate::error::Result;
use crate::models::{InboxEntry, UnreadNotifications};
use axum::{extract::State, Json};

/// GET /chat/inbox
pub async fn inbox(State(state): State<AppState>, ctx: Ctx) -> Result<Json<Vec<InboxEntry>>> {
    let entries = state.chat.notifications().inbox(ctx.user_id()).await?;
    Ok(Json(entries))
}

/// GET /chat/notifications
pub async fn notifications(
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<Json<UnreadNotifications>> {
    let summary = state
        .chat
        .notifications()
        .unread_notifications(ctx.user_id())
        .await?;
    Ok(Json(summary))
}
