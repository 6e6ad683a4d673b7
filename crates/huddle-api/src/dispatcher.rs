use serde_json::json;
use tracing::warn;

use huddle_types::events::MessagePayload;

use crate::error::ApiError;
use crate::state::{AppState, run_blocking};
use crate::webhooks::INTERNAL_URL;

/// Fan a freshly persisted message out to the channel's webhook endpoints.
/// Fire-and-forget: delivery failures are logged and never touch the
/// request that produced the message.
pub fn spawn_dispatch(state: AppState, channel_id: i64, payload: &MessagePayload) {
    let body = json!({
        "event": "message.new",
        "data": {
            "id": payload.id,
            "channel_id": payload.channel_id,
            "content": payload.content,
            "sender_uuid": payload.sender_uuid,
            "created_at": payload.created_at,
        }
    });

    tokio::spawn(async move {
        if let Err(e) = dispatch(state, channel_id, body).await {
            warn!("webhook dispatch for channel {} failed: {}", channel_id, e);
        }
    });
}

async fn dispatch(state: AppState, channel_id: i64, body: serde_json::Value) -> Result<(), ApiError> {
    let endpoints = run_blocking({
        let state = state.clone();
        move || Ok(state.db.webhook_endpoints(channel_id)?)
    })
    .await?;

    for (url, secret) in endpoints {
        if url.is_empty() || url == INTERNAL_URL {
            continue;
        }
        let client = state.http.clone();
        let body = body.clone();
        tokio::spawn(async move {
            match client
                .post(&url)
                .header("x-webhook-secret", secret)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) if !resp.status().is_success() => {
                    warn!("webhook endpoint {} answered {}", url, resp.status());
                }
                Ok(_) => {}
                Err(e) => warn!("webhook send to {} failed: {}", url, e),
            }
        });
    }

    Ok(())
}
