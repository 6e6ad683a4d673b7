use std::sync::Arc;

use uuid::Uuid;

use huddle_db::Database;
use huddle_gateway::Broadcaster;
use huddle_types::token::TokenKeys;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub keys: Arc<TokenKeys>,
    pub broadcaster: Broadcaster,
    pub http: reqwest::Client,
    /// Fallback sender for webhook posts into channels without an owner.
    pub webhook_default_sender: Option<Uuid>,
}

/// Run blocking database work off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Unexpected(anyhow::anyhow!("blocking task join error: {}", e)))?
}
