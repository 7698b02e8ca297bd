//! Chat server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::AuthManager;
use crate::chat::ChatService;
use crate::properties::SqlitePropertyDirectory;
use crate::registry::ConnectionRegistry;

/// Configuration for the chat server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,
    /// Redis URL for the cross-process relay; in-process relay when unset
    pub redis_url: Option<String>,
    /// Identifies this process in logs and health output
    pub instance_id: String,
    /// Outbound frames buffered per live connection before drops
    pub connection_buffer: usize,
    /// Session lifetime in days
    pub session_ttl_days: i64,
    /// bcrypt work factor for password hashes
    pub bcrypt_cost: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("chat_data"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            redis_url: None,
            instance_id: format!("chat-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            connection_buffer: 64,
            session_ttl_days: 30,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl ServerConfig {
    /// Load `.env` (if any) and read the environment
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    /// Unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            data_dir: parsed("CHAT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            bind_addr: parsed("CHAT_BIND_ADDR")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.bind_addr),
            redis_url: parsed("REDIS_URL"),
            instance_id: parsed("CHAT_INSTANCE_ID").unwrap_or(defaults.instance_id),
            connection_buffer: parsed("CHAT_CONNECTION_BUFFER")
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.connection_buffer),
            session_ttl_days: defaults.session_ttl_days,
            bcrypt_cost: parsed("CHAT_BCRYPT_COST")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.bcrypt_cost),
        }
    }

    /// Config rooted at a custom data directory, ignoring the environment.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("chat.sqlite")
    }

    /// Ensure the data directory exists
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub auth: Arc<AuthManager>,
    pub properties: Arc<SqlitePropertyDirectory>,
    pub chat: Arc<ChatService>,
    pub registry: Arc<ConnectionRegistry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_with_data_dir_uses_plain_defaults() {
        let config = ServerConfig::with_data_dir("/tmp/chat-test");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/chat-test"));
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 3001)));
        assert_eq!(config.connection_buffer, 64);
        assert!(config.redis_url.is_none());
        assert_eq!(config.database_path(), PathBuf::from("/tmp/chat-test/chat.sqlite"));
    }

    #[test]
    fn test_lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CHAT_DATA_DIR", "/srv/chat"),
            ("CHAT_BIND_ADDR", "127.0.0.1:4000"),
            ("REDIS_URL", "redis://cache:6379"),
            ("CHAT_INSTANCE_ID", "chat-a"),
            ("CHAT_CONNECTION_BUFFER", "8"),
            ("CHAT_BCRYPT_COST", "5"),
        ]);
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.data_dir, PathBuf::from("/srv/chat"));
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.instance_id, "chat-a");
        assert_eq!(config.connection_buffer, 8);
        assert_eq!(config.bcrypt_cost, 5);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CHAT_BIND_ADDR", "not an address"),
            ("CHAT_CONNECTION_BUFFER", "0"),
            ("REDIS_URL", "  "),
        ]);
        let config = ServerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 3001)));
        assert_eq!(config.connection_buffer, 64);
        assert!(config.redis_url.is_none());
    }
}
