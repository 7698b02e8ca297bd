//! Authentication Module
//!
//! Session-token identity provider. Users are keyed by e-mail, which is
//! also the user id the chat core works with.

pub mod handlers;
pub mod middleware;

use async_trait::async_trait;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::models::{from_micros, to_micros, Identity};

/// Verifies a bearer credential and names the caller.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Identity>;
}

/// Session token for authenticated requests
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Lower-cased, trimmed e-mail used as the user id
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Auth manager handles signup, login and token verification
pub struct AuthManager {
    pool: SqlitePool,
    session_ttl: Duration,
    bcrypt_cost: u32,
}

impl AuthManager {
    pub async fn new(pool: SqlitePool, session_ttl_days: i64) -> Result<Self> {
        let manager = Self {
            pool,
            session_ttl: Duration::days(session_ttl_days),
            bcrypt_cost: DEFAULT_COST,
        };
        manager.init_db().await?;
        info!("[Auth] Initialized");
        Ok(manager)
    }

    /// Override the bcrypt work factor (clamped to bcrypt's 4..=31).
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost.clamp(4, 31);
        self
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                email TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_login INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(email) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register a new user
    pub async fn signup(&self, email: &str, display_name: &str, password: &str) -> Result<Identity> {
        let email = normalize_email(email);
        let display_name = display_name.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ChatError::InvalidInput("a valid e-mail is required".into()));
        }
        if display_name.is_empty() {
            return Err(ChatError::InvalidInput("display name is required".into()));
        }
        if password.len() < 6 {
            return Err(ChatError::InvalidInput(
                "password must be at least 6 characters".into(),
            ));
        }

        let password_hash = hash(password, self.bcrypt_cost)
            .map_err(|e| ChatError::Internal(format!("failed to hash password: {e}")))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO users (email, display_name, password_hash, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(email) DO NOTHING
            "#,
        )
        .bind(&email)
        .bind(display_name)
        .bind(&password_hash)
        .bind(to_micros(Utc::now()))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(ChatError::InvalidInput("email already registered".into()));
        }

        info!("[Auth] User registered: {}", email);
        Ok(Identity {
            user_id: email,
            display_name: display_name.to_string(),
        })
    }

    /// Check credentials and open a session
    pub async fn login(&self, email: &str, password: &str) -> Result<(Identity, Session)> {
        let email = normalize_email(email);
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT display_name, password_hash FROM users WHERE email = ?")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await?;

        let (display_name, password_hash) =
            row.ok_or_else(|| ChatError::Auth("invalid email or password".into()))?;

        let valid = verify(password, &password_hash)
            .map_err(|e| ChatError::Internal(format!("failed to verify password: {e}")))?;
        if !valid {
            warn!("[Auth] Failed login attempt for {}", email);
            return Err(ChatError::Auth("invalid email or password".into()));
        }

        let now = Utc::now();
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: email.clone(),
            created_at: now,
            expires_at: now + self.session_ttl,
        };

        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(&session.user_id)
        .bind(to_micros(session.created_at))
        .bind(to_micros(session.expires_at))
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE users SET last_login = ? WHERE email = ?")
            .bind(to_micros(now))
            .bind(&email)
            .execute(&self.pool)
            .await?;

        info!("[Auth] User logged in: {}", email);
        Ok((
            Identity {
                user_id: email,
                display_name,
            },
            session,
        ))
    }

    /// Invalidate a session
    pub async fn logout(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        info!("[Auth] Session invalidated");
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for AuthManager {
    async fn verify(&self, credential: &str) -> Result<Identity> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(ChatError::Auth("missing token".into()));
        }

        let row: Option<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT u.email, u.display_name, s.expires_at
            FROM sessions s
            JOIN users u ON u.email = s.user_id
            WHERE s.token = ?
            "#,
        )
        .bind(credential)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((user_id, display_name, expires_at)) if from_micros(expires_at) > Utc::now() => {
                Ok(Identity {
                    user_id,
                    display_name,
                })
            }
            Some(_) => Err(ChatError::Auth("session expired".into())),
            None => Err(ChatError::Auth("invalid token".into())),
        }
    }
}
