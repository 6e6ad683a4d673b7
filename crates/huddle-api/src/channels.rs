use std::collections::HashSet;

use anyhow::anyhow;
use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use huddle_db::models::ChannelRow;
use huddle_types::api::{
    ChannelListItem, ChannelResponse, ChannelRolesResponse, CreateChannelRequest, RoleIdsRequest,
    RoleVisibilityEntry,
};
use huddle_types::token::{Identity, Role};

use crate::error::ApiError;
use crate::policy::{self, Access};
use crate::state::{AppState, run_blocking};

pub async fn create_channel(
    State(state): State<AppState>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("channel name is required".into()));
    }
    let icon_color = req.icon_color.as_deref().and_then(normalize_color);

    let channel = run_blocking({
        let state = state.clone();
        move || {
            if let Some(creator) = req.created_by {
                if state.db.get_user_by_uuid(&creator.to_string())?.is_none() {
                    return Err(ApiError::NotFound("creating user not found".into()));
                }
            }
            if state.db.channel_name_taken(&name)? {
                return Err(ApiError::Conflict("channel name already in use".into()));
            }

            let row = state.db.create_channel(
                &name,
                req.icon_codepoint,
                icon_color.as_deref(),
                req.created_by.map(|u| u.to_string()).as_deref(),
            )?;
            channel_response(&row)
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(channel)))
}

/// List channels the caller can see: admins get every active channel, other
/// users get active channels they own or that a role of theirs makes
/// visible. Each entry carries the last message and the caller's unread
/// count for badge rendering.
pub async fn list_channels(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<ChannelListItem>>, ApiError> {
    let channels = run_blocking({
        let state = state.clone();
        move || {
            let rows = if identity.role == Role::Admin {
                state.db.list_active_channels()?
            } else {
                let role_ids = state.db.user_role_ids(&identity.id.to_string())?;
                state.db.list_channels_visible_to(&identity.id.to_string(), &role_ids)?
            };

            let user = identity.id.to_string();
            let mut items = Vec::with_capacity(rows.len());
            for row in rows {
                let last = state.db.last_message_in(row.id)?;
                let unread_count = state.db.unread_count(row.id, &user)?;
                let (last_message_content, last_message_at) = match last {
                    Some((content, at)) => (Some(content), Some(at)),
                    None => (None, None),
                };
                items.push(ChannelListItem {
                    channel: channel_response(&row)?,
                    last_message_content,
                    last_message_at,
                    unread_count,
                });
            }
            Ok(items)
        }
    })
    .await?;

    Ok(Json(channels))
}

/// Soft-delete: the channel drops out of listings but its history stays.
pub async fn deactivate_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    run_blocking({
        let state = state.clone();
        move || {
            let channel = state
                .db
                .find_channel(channel_id)?
                .ok_or_else(|| ApiError::NotFound("channel not found".into()))?;
            if let Access::Denied(reason) = policy::can_administer(&identity, &channel) {
                return Err(ApiError::AccessDenied(reason.into()));
            }
            state.db.deactivate_channel(channel_id)?;
            Ok(())
        }
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_channel_roles(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<RoleVisibilityEntry>>, ApiError> {
    let entries = run_blocking({
        let state = state.clone();
        move || {
            let channel = state
                .db
                .find_channel(channel_id)?
                .ok_or_else(|| ApiError::NotFound("channel not found".into()))?;
            if let Access::Denied(reason) = policy::can_administer(&identity, &channel) {
                return Err(ApiError::AccessDenied(reason.into()));
            }

            let allowed: HashSet<String> =
                state.db.visibility_role_ids(channel_id)?.into_iter().collect();
            let mut entries = Vec::new();
            for role in state.db.list_roles()? {
                entries.push(RoleVisibilityEntry {
                    id: role.id.parse().map_err(|e| {
                        ApiError::Unexpected(anyhow!("corrupt role id '{}': {}", role.id, e))
                    })?,
                    has_access: allowed.contains(&role.id),
                    name: role.name,
                });
            }
            Ok(entries)
        }
    })
    .await?;

    Ok(Json(entries))
}

/// Replace the channel's visibility set wholesale. Unknown role ids reject
/// the whole request so a typo can't silently drop a grant.
pub async fn update_channel_roles(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<RoleIdsRequest>,
) -> Result<Json<ChannelRolesResponse>, ApiError> {
    let role_ids = dedup_role_ids(&req.role_ids);

    let applied = run_blocking({
        let state = state.clone();
        move || {
            let channel = state
                .db
                .find_channel(channel_id)?
                .ok_or_else(|| ApiError::NotFound("channel not found".into()))?;
            if let Access::Denied(reason) = policy::can_administer(&identity, &channel) {
                return Err(ApiError::AccessDenied(reason.into()));
            }

            validate_role_ids(&state, &role_ids)?;
            state.db.replace_channel_visibility(channel_id, &role_ids)?;
            Ok(role_ids)
        }
    })
    .await?;

    Ok(Json(ChannelRolesResponse {
        channel_id,
        role_ids: applied.iter().filter_map(|id| id.parse().ok()).collect(),
    }))
}

pub(crate) fn dedup_role_ids(role_ids: &[uuid::Uuid]) -> Vec<String> {
    let mut seen = HashSet::new();
    role_ids
        .iter()
        .map(|id| id.to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

pub(crate) fn validate_role_ids(state: &AppState, role_ids: &[String]) -> Result<(), ApiError> {
    if role_ids.is_empty() {
        return Ok(());
    }
    let found: HashSet<String> = state.db.existing_role_ids(role_ids)?.into_iter().collect();
    let invalid: Vec<&str> = role_ids
        .iter()
        .filter(|id| !found.contains(*id))
        .map(String::as_str)
        .collect();
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "unknown role ids: {}",
            invalid.join(", ")
        )))
    }
}

pub(crate) fn channel_response(row: &ChannelRow) -> Result<ChannelResponse, ApiError> {
    Ok(ChannelResponse {
        id: row.id,
        name: row.name.clone(),
        icon_codepoint: row.icon_codepoint,
        icon_color: row.icon_color.clone(),
        is_active: row.is_active,
        created_by: row.created_by.as_deref().and_then(|u| u.parse().ok()),
        created_at: row.created_at.clone(),
        updated_at: row.updated_at.clone(),
    })
}

/// Strip a leading '#' and collapse blank values to None.
fn normalize_color(raw: &str) -> Option<String> {
    let color = raw.trim().trim_start_matches('#');
    if color.is_empty() {
        None
    } else {
        Some(color.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_normalization() {
        assert_eq!(normalize_color("#ff8800"), Some("ff8800".to_string()));
        assert_eq!(normalize_color("ff8800"), Some("ff8800".to_string()));
        assert_eq!(normalize_color("  #  "), None);
        assert_eq!(normalize_color(""), None);
    }

    #[test]
    fn duplicate_role_ids_collapse_preserving_order() {
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();
        let deduped = dedup_role_ids(&[a, b, a]);
        assert_eq!(deduped, vec![a.to_string(), b.to_string()]);
    }
}
