//! Handlers for the chat server

pub mod notifications;
pub mod threads;
pub mod ws;

pub use crate::config::AppState;

// Auth handlers
pub use crate::auth::handlers::{login, logout, me, signup};

// Property directory
pub use crate::properties::handlers::{create_property, delete_property, get_property};

// Threads and messages
pub use threads::{list_messages, mark_read, open_thread, send_message};

// Inbox and unread counts
pub use notifications::{inbox, notifications};

// Live delivery
pub use ws::ws_upgrade;

use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub instance_id: String,
    pub connections: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        instance_id: state.config.instance_id.clone(),
        connections: state.registry.connection_count(),
    })
}
