//! Property Chat Server Library
//!
//! One-to-one buyer/owner threads per property, persisted in SQLite and
//! delivered live over WebSocket. Several processes may share one
//! database; a Redis relay carries new messages between them.

pub mod auth;
pub mod chat;
pub mod config;
pub mod ctx;
pub mod error;
pub mod handlers;
pub mod models;
pub mod properties;
pub mod registry;
pub mod relay;
pub mod store;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use auth::middleware::mw_require_auth;
use auth::AuthManager;
use chat::ChatService;
use config::{AppState, ServerConfig};
use handlers::{
    // Auth
    signup,
    login,
    logout,
    me,
    // Properties
    create_property,
    delete_property,
    get_property,
    // Threads
    list_messages,
    mark_read,
    open_thread,
    send_message,
    // Notifications
    inbox,
    notifications,
    // Live
    ws_upgrade,
    health_check,
};
use properties::SqlitePropertyDirectory;
use registry::ConnectionRegistry;
use relay::{LocalRelay, RedisRelay, Relay};
use store::ChatStore;

/// Pick the relay: Redis when configured, otherwise in-process.
pub async fn connect_relay(config: &ServerConfig) -> anyhow::Result<Arc<dyn Relay>> {
    match &config.redis_url {
        Some(url) => {
            let relay = RedisRelay::connect(url).await?;
            info!("Relay: redis");
            Ok(Arc::new(relay))
        }
        None => {
            info!("Relay: in-process (single instance only)");
            Ok(Arc::new(LocalRelay::default()))
        }
    }
}

/// Open the database and wire every component around `relay`.
pub async fn build_state(config: ServerConfig, relay: Arc<dyn Relay>) -> anyhow::Result<AppState> {
    config.ensure_dirs().await?;
    let pool = store::connect(&config.database_path()).await?;

    let auth = Arc::new(
        AuthManager::new(pool.clone(), config.session_ttl_days)
            .await?
            .with_bcrypt_cost(config.bcrypt_cost),
    );
    let properties = Arc::new(SqlitePropertyDirectory::new(pool.clone()).await?);
    let store = Arc::new(ChatStore::new(pool).await?);
    let chat = Arc::new(ChatService::new(store, properties.clone(), relay.clone()));
    let registry = Arc::new(ConnectionRegistry::new(relay, config.connection_buffer));

    Ok(AppState {
        config,
        auth,
        properties,
        chat,
        registry,
    })
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/me", get(me))
        // Property directory
        .route("/properties", post(create_property))
        .route(
            "/properties/{property_id}",
            get(get_property).delete(delete_property),
        )
        // Threads
        .route("/chat/property/{property_id}", get(open_thread))
        .route(
            "/chat/threads/{thread_id}/messages",
            get(list_messages).post(send_message),
        )
        .route("/chat/mark-read/{thread_id}", post(mark_read))
        // Notifications
        .route("/chat/inbox", get(inbox))
        .route("/chat/notifications", get(notifications))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            mw_require_auth,
        ));

    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        // authenticates during the handshake
        .route("/chat/ws/{thread_id}", get(ws_upgrade))
        .route("/health", get(health_check))
        .merge(protected)
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

pub async fn run() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chat_server=debug"));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        // Already set, ignore
    }

    info!("=== Property Chat Server ===");
    info!("Instance: {}", config.instance_id);
    info!("Database: {:?}", config.database_path());

    let relay = connect_relay(&config).await?;
    let state = build_state(config, relay).await?;
    let addr = state.config.bind_addr;
    let registry = state.registry.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutting down");
            registry.close_all();
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
