use crate::auth::IdentityProvider;
use crate::config::AppState;
use crate::ctx::Ctx;
use crate::error::{ChatError, Result};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ChatError::Auth("auth header is not valid text".into()))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| ChatError::Auth("auth header wrong format".into()))?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(ChatError::Auth("auth header wrong format".into()));
    }
    Ok(Some(token.trim()))
}

pub async fn mw_require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    debug!("MIDDLEWARE: require_auth");

    let token = bearer_token(req.headers())?
        .ok_or_else(|| ChatError::Auth("no auth token found".into()))?
        .to_string();

    let identity = state.auth.verify(&token).await?;
    req.extensions_mut().insert(Ctx::new(identity));

    Ok(next.run(req).await)
}
