use std::collections::HashMap;

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use huddle_db::Database;
use huddle_db::models::{MessageRow, NewMessage};
use huddle_types::api::{MarkReadRequest, MarkReadResponse, SendMessageRequest};
use huddle_types::events::{MessageKind, MessagePayload, RealtimeEvent};
use huddle_types::token::Identity;

use crate::dispatcher;
use crate::error::ApiError;
use crate::policy;
use crate::state::{AppState, run_blocking};

/// Shown when a sender has no user row to resolve a display name from.
const UNKNOWN_SENDER: &str = "unknown";

/// Post a message: access gate, persist (with the sender's own read receipt
/// in the same transaction), broadcast, then hand off to outbound webhooks.
pub async fn create_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.channel_id <= 0 {
        return Err(ApiError::Validation("invalid channel_id".into()));
    }
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::Validation("content is required".into()));
    }
    let channel_id = req.channel_id;
    let kind = req.kind.unwrap_or(MessageKind::Text);

    let payload = run_blocking({
        let state = state.clone();
        let identity = identity.clone();
        move || {
            policy::ensure_channel_access(&state.db, &identity, channel_id)?;
            let id = state.db.create_message(&NewMessage {
                channel_id,
                kind: kind.as_str(),
                content: &content,
                sender_uuid: &identity.id.to_string(),
                image_url: None,
                mark_read_by_sender: true,
            })?;
            load_payload(&state.db, id, UNKNOWN_SENDER)
        }
    })
    .await?;

    // The message is durable at this point; realtime and outbound delivery
    // are both best-effort.
    state
        .broadcaster
        .broadcast_to_channel(channel_id, &RealtimeEvent::MessageNew(payload.clone()))
        .await;
    dispatcher::spawn_dispatch(state, channel_id, &payload);

    Ok((StatusCode::CREATED, Json(payload)))
}

/// Fetch a channel's messages in stable chronological order. Viewing implies
/// reading: receipts for everything unread are written after the response
/// payload is assembled, off the request path.
pub async fn get_channel_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<MessagePayload>>, ApiError> {
    let messages = run_blocking({
        let state = state.clone();
        let identity = identity.clone();
        move || {
            policy::ensure_channel_access(&state.db, &identity, channel_id)?;

            let rows = state.db.messages_for_channel(channel_id)?;
            let ids: Vec<i64> = rows.iter().map(|m| m.id).collect();
            let mut read_map: HashMap<i64, Vec<Uuid>> = HashMap::new();
            for (message_id, reader) in state.db.readers_for_messages(&ids)? {
                if let Ok(uuid) = reader.parse::<Uuid>() {
                    read_map.entry(message_id).or_default().push(uuid);
                }
            }

            Ok(rows
                .into_iter()
                .map(|row| {
                    let read_by = read_map.remove(&row.id).unwrap_or_default();
                    to_payload(row, read_by, UNKNOWN_SENDER)
                })
                .collect::<Vec<_>>())
        }
    })
    .await?;

    tokio::spawn({
        let state = state.clone();
        let user_id = identity.id;
        async move {
            // Read tracking is an enhancement; failure never surfaces to the
            // fetch that triggered it.
            if let Err(e) = mark_unread_as_read(state, channel_id, user_id, None).await {
                warn!("deferred read receipts for channel {} failed: {}", channel_id, e);
            }
        }
    });

    Ok(Json(messages))
}

/// Explicitly mark messages read, optionally restricted to an id set.
pub async fn mark_channel_read(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
    Extension(identity): Extension<Identity>,
    body: Option<Json<MarkReadRequest>>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    run_blocking({
        let state = state.clone();
        let identity = identity.clone();
        move || policy::ensure_channel_access(&state.db, &identity, channel_id).map(|_| ())
    })
    .await?;

    let only = body.and_then(|Json(req)| req.message_ids);
    let marked = mark_unread_as_read(state, channel_id, identity.id, only).await?;

    Ok(Json(MarkReadResponse { message_ids: marked }))
}

/// Idempotent bulk mark-read shared by the fetch side effect and the
/// explicit endpoint. Broadcasts `message:read` when anything changed.
async fn mark_unread_as_read(
    state: AppState,
    channel_id: i64,
    user_id: Uuid,
    only: Option<Vec<i64>>,
) -> Result<Vec<i64>, ApiError> {
    let marked = run_blocking({
        let state = state.clone();
        move || {
            let user = user_id.to_string();
            let unread = state.db.unread_message_ids(channel_id, &user, only.as_deref())?;
            if !unread.is_empty() {
                state.db.mark_messages_read(&unread, &user)?;
            }
            Ok(unread)
        }
    })
    .await?;

    if !marked.is_empty() {
        state
            .broadcaster
            .broadcast_to_channel(
                channel_id,
                &RealtimeEvent::MessageRead {
                    message_ids: marked.clone(),
                    user_id,
                },
            )
            .await;
    }

    Ok(marked)
}

/// Load a freshly persisted message in wire shape.
pub(crate) fn load_payload(
    db: &Database,
    message_id: i64,
    fallback_name: &str,
) -> Result<MessagePayload, ApiError> {
    let row = db
        .fetch_message(message_id)?
        .ok_or_else(|| ApiError::NotFound("message not found".into()))?;
    let read_by = db
        .readers_for_messages(&[message_id])?
        .into_iter()
        .filter_map(|(_, reader)| reader.parse().ok())
        .collect();
    Ok(to_payload(row, read_by, fallback_name))
}

pub(crate) fn to_payload(row: MessageRow, read_by: Vec<Uuid>, fallback_name: &str) -> MessagePayload {
    let sender_name = row.sender_name.clone().unwrap_or_else(|| fallback_name.to_string());
    MessagePayload {
        id: row.id,
        channel_id: row.channel_id,
        kind: MessageKind::from_db(&row.kind),
        content: row.content,
        image_url: row.image_url,
        sender_uuid: row.sender_uuid.parse().unwrap_or_else(|e| {
            warn!("Corrupt sender_uuid '{}' on message {}: {}", row.sender_uuid, row.id, e);
            Uuid::default()
        }),
        sender_name,
        created_at: parse_db_timestamp(&row.created_at).unwrap_or_else(|| {
            warn!("Corrupt created_at '{}' on message {}", row.created_at, row.id);
            chrono::DateTime::default()
        }),
        read_by,
    }
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Parse as naive UTC, falling back from RFC 3339.
fn parse_db_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
                .ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str, sender_name: Option<&str>) -> MessageRow {
        MessageRow {
            id: 1,
            channel_id: 7,
            kind: kind.into(),
            content: "hi".into(),
            image_url: None,
            sender_uuid: Uuid::new_v4().to_string(),
            sender_name: sender_name.map(Into::into),
            created_at: "2024-06-01 12:30:00".into(),
        }
    }

    #[test]
    fn payload_uses_joined_display_name() {
        let payload = to_payload(row("text", Some("Alice")), vec![], UNKNOWN_SENDER);
        assert_eq!(payload.sender_name, "Alice");
        assert_eq!(payload.kind, MessageKind::Text);
        assert_eq!(payload.created_at.to_rfc3339(), "2024-06-01T12:30:00+00:00");
    }

    #[test]
    fn payload_falls_back_when_sender_has_no_user_row() {
        let payload = to_payload(row("webhook", None), vec![], "Webhook");
        assert_eq!(payload.sender_name, "Webhook");
        assert_eq!(payload.kind, MessageKind::Webhook);
    }

    #[test]
    fn db_timestamps_parse_with_and_without_timezone() {
        assert!(parse_db_timestamp("2024-06-01 12:30:00").is_some());
        assert!(parse_db_timestamp("2024-06-01T12:30:00Z").is_some());
        assert!(parse_db_timestamp("nonsense").is_none());
    }
}
