//! Property Directory
//!
//! Resolves properties to their owners. The chat core only needs
//! `resolve_owner`; registration and deletion exist so the server can be
//! run on its own.

pub mod handlers;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{ChatError, Result};
use crate::models::{from_micros, to_micros, Property, PropertyId};

/// Answers "who owns this property?"
#[async_trait]
pub trait PropertyDirectory: Send + Sync {
    /// Owner user id, or `NotFound`
    async fn resolve_owner(&self, property_id: PropertyId) -> Result<String>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProperty {
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
}

type PropertyRow = (String, String, String, String, String, String, i64);

fn property_from_row(
    (id, owner_id, title, category, location, description, created_at): PropertyRow,
) -> Result<Property> {
    Ok(Property {
        property_id: PropertyId::parse(&id)
            .map_err(|_| ChatError::Internal(format!("corrupt property id {id}")))?,
        owner_id,
        title,
        category,
        location,
        description,
        created_at: from_micros(created_at),
    })
}

/// SQLite-backed property directory
pub struct SqlitePropertyDirectory {
    pool: SqlitePool,
}

impl SqlitePropertyDirectory {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS properties (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!("[Properties] Initialized");
        Ok(Self { pool })
    }

    pub async fn register(&self, owner_id: &str, input: NewProperty) -> Result<Property> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(ChatError::InvalidInput("property title is required".into()));
        }

        let property = Property {
            property_id: PropertyId::new(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            category: input.category.trim().to_string(),
            location: input.location.trim().to_string(),
            description: input.description,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO properties (id, owner_id, title, category, location, description, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(property.property_id.to_string())
        .bind(&property.owner_id)
        .bind(&property.title)
        .bind(&property.category)
        .bind(&property.location)
        .bind(&property.description)
        .bind(to_micros(property.created_at))
        .execute(&self.pool)
        .await?;

        info!(property_id = %property.property_id, owner = %owner_id, "Registered property");
        Ok(property)
    }

    pub async fn get(&self, property_id: PropertyId) -> Result<Option<Property>> {
        let row: Option<PropertyRow> = sqlx::query_as(
            r#"
            SELECT id, owner_id, title, category, location, description, created_at
            FROM properties WHERE id = ?
            "#,
        )
        .bind(property_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(property_from_row).transpose()
    }

    /// Remove a property. Only its owner may do so.
    pub async fn delete(&self, property_id: PropertyId, acting_user: &str) -> Result<()> {
        let property = self
            .get(property_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("property {property_id}")))?;
        if property.owner_id != acting_user {
            return Err(ChatError::Forbidden("only the owner can delete a property".into()));
        }

        sqlx::query("DELETE FROM properties WHERE id = ?")
            .bind(property_id.to_string())
            .execute(&self.pool)
            .await?;

        info!(property_id = %property_id, "Deleted property");
        Ok(())
    }
}

#[async_trait]
impl PropertyDirectory for SqlitePropertyDirectory {
    async fn resolve_owner(&self, property_id: PropertyId) -> Result<String> {
        let owner: Option<(String,)> = sqlx::query_as("SELECT owner_id FROM properties WHERE id = ?")
            .bind(property_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        owner
            .map(|(owner_id,)| owner_id)
            .ok_or_else(|| ChatError::NotFound(format!("property {property_id}")))
    }
}
