//! Auth handlers

use crate::auth::middleware::bearer_token;
use crate::config::AppState;
use crate::ctx::Ctx;
use crate::error::Result;
use crate::models::Identity;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: String,
    pub display_name: String,
}

/// POST /auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<AuthResponse>> {
    info!("POST /auth/signup - {}", req.email);

    state
        .auth
        .signup(&req.email, &req.display_name, &req.password)
        .await?;
    let (identity, session) = state.auth.login(&req.email, &req.password).await?;

    Ok(Json(AuthResponse {
        token: session.token,
        user_id: identity.user_id,
        display_name: identity.display_name,
    }))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    info!("POST /auth/login - {}", req.email);

    let (identity, session) = state.auth.login(&req.email, &req.password).await?;
    Ok(Json(AuthResponse {
        token: session.token,
        user_id: identity.user_id,
        display_name: identity.display_name,
    }))
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode> {
    if let Some(token) = bearer_token(&headers)? {
        state.auth.logout(token).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /auth/me
pub async fn me(ctx: Ctx) -> Json<Identity> {
    Json(ctx.identity().clone())
}
