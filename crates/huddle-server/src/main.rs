use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use huddle_api::middleware::require_auth;
use huddle_api::state::{AppState, AppStateInner};
use huddle_api::{auth, channels, messages, roles, users, webhooks};
use huddle_gateway::connection::{self, HandshakeParams};
use huddle_gateway::{Broadcaster, ChannelRegistry};
use huddle_types::token::TokenKeys;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("HUDDLE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let jwt_refresh_secret = std::env::var("HUDDLE_JWT_REFRESH_SECRET")
        .unwrap_or_else(|_| "dev-refresh-secret-change-me".into());
    let db_path = std::env::var("HUDDLE_DB_PATH").unwrap_or_else(|_| "huddle.db".into());
    let host = std::env::var("HUDDLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("HUDDLE_PORT")
        .unwrap_or_else(|_| "3300".into())
        .parse()?;
    let webhook_default_sender = std::env::var("HUDDLE_WEBHOOK_DEFAULT_SENDER")
        .ok()
        .and_then(|raw| raw.parse::<uuid::Uuid>().ok());

    // Init database
    let db = huddle_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state: one registry instance owns every live connection for the
    // lifetime of the process.
    let registry = ChannelRegistry::new();
    let state: AppState = Arc::new(AppStateInner {
        db,
        keys: Arc::new(TokenKeys::from_secrets(&jwt_secret, &jwt_refresh_secret)),
        broadcaster: Broadcaster::new(registry.clone()),
        http: reqwest::Client::new(),
        webhook_default_sender,
    });

    // Routes
    let public_routes = Router::new()
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/refresh", post(auth::refresh))
        .route("/api/v1/channels/create", post(channels::create_channel))
        .route("/api/v1/webhooks/incoming", post(webhooks::receive_webhook))
        .route("/api/v1/webhooks/notify", post(webhooks::receive_notification))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/v1/channels", get(channels::list_channels))
        .route("/api/v1/channels/{id}", delete(channels::deactivate_channel))
        .route(
            "/api/v1/channels/{id}/roles",
            get(channels::get_channel_roles).put(channels::update_channel_roles),
        )
        .route("/api/v1/messages", post(messages::create_message))
        .route("/api/v1/messages/{channel_id}", get(messages::get_channel_messages))
        .route("/api/v1/messages/{channel_id}/read", post(messages::mark_channel_read))
        .route("/api/v1/webhooks", post(webhooks::create_webhook))
        .route("/api/v1/webhooks/{channel_id}", get(webhooks::list_webhooks))
        .route("/api/v1/roles", get(roles::list_roles).post(roles::create_role))
        .route("/api/v1/users", get(users::list_users))
        .route(
            "/api/v1/users/{id}/roles",
            get(users::get_user_roles).put(users::update_user_roles),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Huddle server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Tear down the registry so every live connection gets a close frame.
    registry.shutdown().await;
    info!("Huddle server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
    #[serde(rename = "channelId")]
    channel_id: Option<String>,
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let registry = state.broadcaster.registry().clone();
    let keys = state.keys.clone();
    ws.on_upgrade(move |socket| {
        connection::handle_connection(
            socket,
            registry,
            keys,
            HandshakeParams {
                token: query.token,
                channel_id: query.channel_id,
            },
        )
    })
}
