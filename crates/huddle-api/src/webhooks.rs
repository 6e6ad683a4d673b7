use axum::{
    Json,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use huddle_db::models::{NewMessage, WebhookRow};
use huddle_types::api::{
    CreateWebhookRequest, NotificationIngestRequest, WebhookIngestRequest, WebhookResponse,
};
use huddle_types::events::{MessageKind, RealtimeEvent};
use huddle_types::token::Identity;

use crate::error::ApiError;
use crate::messages::load_payload;
use crate::policy::{self, Access};
use crate::state::{AppState, run_blocking};

/// Webhook posts with no user row behind the sender show up under this name.
const WEBHOOK_SENDER: &str = "Webhook";
const NOTIFICATION_SENDER: &str = "Notification";

/// Blank webhook urls mean "inbound only" — nothing to dispatch to.
pub(crate) const INTERNAL_URL: &str = "internal";

pub async fn list_webhooks(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<WebhookResponse>>, ApiError> {
    let hooks = run_blocking({
        let state = state.clone();
        move || {
            let channel = state
                .db
                .find_channel(channel_id)?
                .ok_or_else(|| ApiError::NotFound("channel not found".into()))?;
            if let Access::Denied(reason) = policy::can_administer(&identity, &channel) {
                return Err(ApiError::AccessDenied(reason.into()));
            }
            Ok(state
                .db
                .list_webhooks(channel_id)?
                .into_iter()
                .map(webhook_response)
                .collect::<Vec<_>>())
        }
    })
    .await?;

    Ok(Json(hooks))
}

pub async fn create_webhook(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.channel_id <= 0 {
        return Err(ApiError::Validation("invalid channel_id".into()));
    }
    let secret = req.secret_token.trim().to_string();
    if secret.is_empty() {
        return Err(ApiError::Validation("secret_token is required".into()));
    }
    let url = match req.url.as_deref().map(str::trim) {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => INTERNAL_URL.to_string(),
    };

    let hook = run_blocking({
        let state = state.clone();
        move || {
            let channel = state
                .db
                .find_channel(req.channel_id)?
                .ok_or_else(|| ApiError::NotFound("channel not found".into()))?;
            if let Access::Denied(reason) = policy::can_administer(&identity, &channel) {
                return Err(ApiError::AccessDenied(reason.into()));
            }
            Ok(webhook_response(state.db.create_webhook(
                req.channel_id,
                &url,
                &secret,
            )?))
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(hook)))
}

/// Inbound webhook post: authenticated by the channel's shared secret, not a
/// user credential. The sender identity resolves from the payload, then the
/// channel owner, then the configured default.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<WebhookIngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.channel_id <= 0 {
        return Err(ApiError::Validation("invalid channel_id".into()));
    }
    let secret = secret_from(&headers, req.secret_token.as_deref())
        .ok_or_else(|| ApiError::Auth("missing secret token".into()))?;

    let content = req.content.as_deref().map(str::trim).unwrap_or_default().to_string();
    let image_url = req
        .image_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string);
    if content.is_empty() && image_url.is_none() {
        return Err(ApiError::Validation("content or image_url is required".into()));
    }

    let channel_id = req.channel_id;
    let explicit_sender = req.sender_uuid;

    let payload = run_blocking({
        let state = state.clone();
        move || {
            state
                .db
                .find_webhook(channel_id, &secret)?
                .ok_or_else(|| ApiError::Auth("invalid secret token".into()))?;

            let sender = resolve_sender(&state, channel_id, explicit_sender)?;
            let kind = if image_url.is_some() {
                MessageKind::Image
            } else {
                MessageKind::Webhook
            };
            let id = state.db.create_message(&NewMessage {
                channel_id,
                kind: kind.as_str(),
                content: &content,
                sender_uuid: &sender,
                image_url: image_url.as_deref(),
                mark_read_by_sender: false,
            })?;
            load_payload(&state.db, id, WEBHOOK_SENDER)
        }
    })
    .await?;

    state
        .broadcaster
        .broadcast_to_channel(channel_id, &RealtimeEvent::MessageNew(payload.clone()))
        .await;

    Ok((StatusCode::CREATED, Json(payload)))
}

/// Inbound notification post: same secret authentication, but the message is
/// flagged as a notification and displayed under the given title.
pub async fn receive_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NotificationIngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.channel_id <= 0 {
        return Err(ApiError::Validation("invalid channel_id".into()));
    }
    let secret = secret_from(&headers, req.secret_token.as_deref())
        .ok_or_else(|| ApiError::Auth("missing secret token".into()))?;

    let content = req.content.as_deref().map(str::trim).unwrap_or_default().to_string();
    if content.is_empty() {
        return Err(ApiError::Validation("content is required".into()));
    }

    let channel_id = req.channel_id;
    let explicit_sender = req.sender_uuid;
    let title = req
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let payload = run_blocking({
        let state = state.clone();
        move || {
            state
                .db
                .find_webhook(channel_id, &secret)?
                .ok_or_else(|| ApiError::Auth("invalid secret token".into()))?;

            let sender = resolve_sender(&state, channel_id, explicit_sender)?;
            let id = state.db.create_message(&NewMessage {
                channel_id,
                kind: MessageKind::Notification.as_str(),
                content: &content,
                sender_uuid: &sender,
                image_url: None,
                mark_read_by_sender: true,
            })?;

            let mut payload = load_payload(&state.db, id, NOTIFICATION_SENDER)?;
            // Notifications always display under their title.
            payload.sender_name = title.unwrap_or_else(|| NOTIFICATION_SENDER.to_string());
            Ok(payload)
        }
    })
    .await?;

    state
        .broadcaster
        .broadcast_to_channel(channel_id, &RealtimeEvent::MessageNew(payload.clone()))
        .await;

    Ok((StatusCode::CREATED, Json(payload)))
}

/// Sender resolution order: explicit payload field, channel owner,
/// configured default.
fn resolve_sender(
    state: &AppState,
    channel_id: i64,
    explicit: Option<uuid::Uuid>,
) -> Result<String, ApiError> {
    if let Some(sender) = explicit {
        return Ok(sender.to_string());
    }
    if let Some(owner) = state.db.find_channel(channel_id)?.and_then(|c| c.created_by) {
        return Ok(owner);
    }
    if let Some(fallback) = state.webhook_default_sender {
        return Ok(fallback.to_string());
    }
    Err(ApiError::Validation(
        "no resolvable sender for webhook message".into(),
    ))
}

fn secret_from(headers: &HeaderMap, body_secret: Option<&str>) -> Option<String> {
    headers
        .get("x-webhook-secret")
        .and_then(|v| v.to_str().ok())
        .or(body_secret)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn webhook_response(row: WebhookRow) -> WebhookResponse {
    WebhookResponse {
        id: row.id,
        channel_id: row.channel_id,
        url: row.url,
        created_at: row.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use huddle_db::Database;
    use huddle_gateway::{Broadcaster, ChannelRegistry};
    use huddle_types::token::TokenKeys;
    use uuid::Uuid;

    use crate::state::AppStateInner;

    fn test_state(default_sender: Option<Uuid>) -> AppState {
        Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            keys: Arc::new(TokenKeys::from_secrets("access", "refresh")),
            broadcaster: Broadcaster::new(ChannelRegistry::new()),
            http: reqwest::Client::new(),
            webhook_default_sender: default_sender,
        })
    }

    #[test]
    fn sender_resolution_prefers_explicit_then_owner_then_default() {
        let state = test_state(Some(Uuid::nil()));
        state
            .db
            .create_user("owner-uuid", "owner@example.com", "hash", "Owner", "employee", None, None)
            .unwrap();
        let owned = state.db.create_channel("owned", None, None, Some("owner-uuid")).unwrap();
        let orphan = state.db.create_channel("orphan", None, None, None).unwrap();

        let explicit = Uuid::new_v4();
        assert_eq!(
            resolve_sender(&state, owned.id, Some(explicit)).unwrap(),
            explicit.to_string()
        );
        assert_eq!(resolve_sender(&state, owned.id, None).unwrap(), "owner-uuid");
        assert_eq!(
            resolve_sender(&state, orphan.id, None).unwrap(),
            Uuid::nil().to_string()
        );
    }

    #[test]
    fn unresolvable_sender_is_a_validation_failure() {
        let state = test_state(None);
        let orphan = state.db.create_channel("orphan", None, None, None).unwrap();

        let err = resolve_sender(&state, orphan.id, None).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        // Nothing was persisted along the way.
        assert!(state.db.messages_for_channel(orphan.id).unwrap().is_empty());
    }

    #[test]
    fn secret_header_wins_over_body() {
        let mut headers = HeaderMap::new();
        headers.insert("x-webhook-secret", "from-header".parse().unwrap());
        assert_eq!(
            secret_from(&headers, Some("from-body")).as_deref(),
            Some("from-header")
        );
        assert_eq!(
            secret_from(&HeaderMap::new(), Some("from-body")).as_deref(),
            Some("from-body")
        );
        assert_eq!(secret_from(&HeaderMap::new(), None), None);
        assert_eq!(secret_from(&HeaderMap::new(), Some("   ")), None);
    }
}
