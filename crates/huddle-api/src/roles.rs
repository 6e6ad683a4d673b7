use anyhow::anyhow;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use uuid::Uuid;

use huddle_db::models::RoleRow;
use huddle_types::api::{CreateRoleRequest, RoleResponse};

use crate::error::ApiError;
use crate::state::{AppState, run_blocking};

pub async fn create_role(
    State(state): State<AppState>,
    Json(req): Json<CreateRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("role name is required".into()));
    }

    let role = run_blocking({
        let state = state.clone();
        move || {
            if state.db.get_role_by_name(&name)?.is_some() {
                return Err(ApiError::Conflict("role name already in use".into()));
            }
            let row = state.db.create_role(&Uuid::new_v4().to_string(), &name)?;
            role_response(&row)
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn list_roles(
    State(state): State<AppState>,
) -> Result<Json<Vec<RoleResponse>>, ApiError> {
    let roles = run_blocking({
        let state = state.clone();
        move || {
            state
                .db
                .list_roles()?
                .iter()
                .map(role_response)
                .collect::<Result<Vec<_>, _>>()
        }
    })
    .await?;

    Ok(Json(roles))
}

pub(crate) fn role_response(row: &RoleRow) -> Result<RoleResponse, ApiError> {
    Ok(RoleResponse {
        id: row
            .id
            .parse()
            .map_err(|e| ApiError::Unexpected(anyhow!("corrupt role id '{}': {}", row.id, e)))?,
        name: row.name.clone(),
        created_at: row.created_at.clone(),
    })
}
