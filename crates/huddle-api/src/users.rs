use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use huddle_types::api::{RoleIdsRequest, RoleResponse, UserResponse, UserRolesResponse};

use crate::auth::user_response;
use crate::channels::{dedup_role_ids, validate_role_ids};
use crate::error::ApiError;
use crate::roles::role_response;
use crate::state::{AppState, run_blocking};

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = run_blocking({
        let state = state.clone();
        move || {
            state
                .db
                .list_users()?
                .iter()
                .map(user_response)
                .collect::<Result<Vec<_>, _>>()
        }
    })
    .await?;

    Ok(Json(users))
}

pub async fn get_user_roles(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<RoleResponse>>, ApiError> {
    let roles = run_blocking({
        let state = state.clone();
        move || {
            if state.db.get_user_by_uuid(&user_id.to_string())?.is_none() {
                return Err(ApiError::NotFound("user not found".into()));
            }
            state
                .db
                .user_roles(&user_id.to_string())?
                .iter()
                .map(role_response)
                .collect::<Result<Vec<_>, _>>()
        }
    })
    .await?;

    Ok(Json(roles))
}

/// Replace a user's role assignments. Unknown role ids reject the whole
/// request, mirroring channel visibility updates.
pub async fn update_user_roles(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<RoleIdsRequest>,
) -> Result<Json<UserRolesResponse>, ApiError> {
    let role_ids = dedup_role_ids(&req.role_ids);

    let applied = run_blocking({
        let state = state.clone();
        move || {
            if state.db.get_user_by_uuid(&user_id.to_string())?.is_none() {
                return Err(ApiError::NotFound("user not found".into()));
            }
            validate_role_ids(&state, &role_ids)?;
            state.db.replace_user_roles(&user_id.to_string(), &role_ids)?;
            Ok(role_ids)
        }
    })
    .await?;

    Ok(Json(UserRolesResponse {
        user_id,
        role_ids: applied.iter().filter_map(|id| id.parse().ok()).collect(),
    }))
}
