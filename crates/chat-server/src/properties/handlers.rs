//! Property handlers

use crate::config::AppState;
use crate::ctx::Ctx;
use crate::error::{ChatError, Result};
use crate::models::{Property, PropertyId};
use crate::properties::NewProperty;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

/// POST /properties
pub async fn create_property(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(input): Json<NewProperty>,
) -> Result<(StatusCode, Json<Property>)> {
    info!("POST /properties - {}", ctx.user_id());
    let property = state.properties.register(ctx.user_id(), input).await?;
    Ok((StatusCode::CREATED, Json(property)))
}

/// GET /properties/{property_id}
pub async fn get_property(
    State(state): State<AppState>,
    Path(property_id): Path<String>,
) -> Result<Json<Property>> {
    let property_id = PropertyId::parse(&property_id)?;
    state
        .properties
        .get(property_id)
        .await?
        .map(Json)
        .ok_or_else(|| ChatError::NotFound(format!("property {property_id}")))
}

/// DELETE /properties/{property_id}
///
/// Removes the property along with every thread opened on it.
pub async fn delete_property(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(property_id): Path<String>,
) -> Result<StatusCode> {
    info!("DELETE /properties/{} - {}", property_id, ctx.user_id());
    let property_id = PropertyId::parse(&property_id)?;

    // threads and their messages go with the row
    state.properties.delete(property_id, ctx.user_id()).await?;

    Ok(StatusCode::NO_CONTENT)
}
