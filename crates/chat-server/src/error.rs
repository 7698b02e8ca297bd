use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ChatError {
    // Auth
    #[error("authentication required: {0}")]
    Auth(String),
    #[error("forbidden: {0}")]
    Forbidden(String),

    // Lookup / validation
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    // Infrastructure
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("relay error: {0}")]
    Relay(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = core::result::Result<T, ChatError>;

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Auth(_) => StatusCode::UNAUTHORIZED,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::InvalidInput(_) | ChatError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            ChatError::Store(_)
            | ChatError::Relay(_)
            | ChatError::Json(_)
            | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to a client. Infrastructure details stay in the logs.
    pub fn public_message(&self) -> String {
        if self.status().is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": {
                "message": self.public_message()
            }
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Internal(err.to_string())
    }
}
