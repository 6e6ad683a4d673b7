use std::net::SocketAddr;

use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use huddle_db::models::UserRow;
use huddle_types::api::{
    LoginRequest, RefreshRequest, RegisterRequest, TokenPairResponse, UserResponse,
};
use huddle_types::token::{Identity, REFRESH_TOKEN_TTL_DAYS, Role, TokenError};

use crate::error::ApiError;
use crate::state::{AppState, run_blocking};

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.email.trim().is_empty() || req.password.is_empty() || req.display_name.trim().is_empty()
    {
        return Err(ApiError::Validation(
            "email, password and display_name are required".into(),
        ));
    }
    if !is_valid_email(req.email.trim()) {
        return Err(ApiError::Validation("invalid email format".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }

    let user = run_blocking({
        let state = state.clone();
        move || {
            let email = req.email.trim().to_string();
            if state.db.get_user_by_email(&email)?.is_some() {
                return Err(ApiError::Conflict("email already registered".into()));
            }

            // Argon2id with a fresh salt per user.
            let salt = SaltString::generate(&mut OsRng);
            let password_hash = Argon2::default()
                .hash_password(req.password.as_bytes(), &salt)
                .map_err(|e| ApiError::Unexpected(anyhow!("password hashing failed: {}", e)))?
                .to_string();

            let uuid = Uuid::new_v4();
            let role = req.role.unwrap_or(Role::Employee);
            let branch = req.branch.as_deref().map(|b| b.to_uppercase());
            let team = req.team.as_deref().map(|t| t.to_uppercase());
            state.db.create_user(
                &uuid.to_string(),
                &email,
                &password_hash,
                req.display_name.trim(),
                role.as_str(),
                branch.as_deref(),
                team.as_deref(),
            )?;

            let row = state
                .db
                .get_user_by_uuid(&uuid.to_string())?
                .ok_or_else(|| ApiError::Unexpected(anyhow!("user vanished after insert")))?;
            user_response(&row)
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::Validation("email and password are required".into()));
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = run_blocking({
        let state = state.clone();
        move || {
            let row = state
                .db
                .get_user_by_email(req.email.trim())?
                .ok_or_else(|| ApiError::Auth("invalid email or password".into()))?;

            let parsed_hash = PasswordHash::new(&row.password)
                .map_err(|e| ApiError::Unexpected(anyhow!("corrupt password hash: {}", e)))?;
            Argon2::default()
                .verify_password(req.password.as_bytes(), &parsed_hash)
                .map_err(|_| ApiError::Auth("invalid email or password".into()))?;

            let identity = identity_of(&row)?;
            let (access_token, refresh_token) = issue_pair(&state, &identity)?;
            state.db.store_refresh_token(
                &row.uuid,
                &refresh_token,
                Some(&addr.ip().to_string()),
                user_agent.as_deref(),
                &refresh_expiry().to_rfc3339(),
            )?;

            Ok(TokenPairResponse {
                user: user_response(&row)?,
                access_token,
                refresh_token,
            })
        }
    })
    .await?;

    Ok(Json(response))
}

pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    if req.refresh_token.is_empty() {
        return Err(ApiError::Validation("refresh token is required".into()));
    }

    let claims = state.keys.verify_refresh(&req.refresh_token).map_err(|e| match e {
        TokenError::Expired => ApiError::Auth("refresh token expired".into()),
        TokenError::Invalid => ApiError::Auth("invalid refresh token".into()),
    })?;

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = run_blocking({
        let state = state.clone();
        move || {
            let record = state
                .db
                .find_active_refresh_token(&req.refresh_token)?
                .ok_or_else(|| ApiError::Auth("invalid refresh token".into()))?;
            if claims.sub.to_string() != record.user_uuid {
                return Err(ApiError::Auth("invalid refresh token".into()));
            }

            let expires_at = chrono::DateTime::parse_from_rfc3339(&record.expires_at)
                .map_err(|e| ApiError::Unexpected(anyhow!("corrupt token expiry: {}", e)))?
                .with_timezone(&Utc);
            if expires_at < Utc::now() {
                state.db.revoke_refresh_token(&record.refresh_token)?;
                return Err(ApiError::Auth("refresh token expired".into()));
            }

            let row = state
                .db
                .get_user_by_uuid(&record.user_uuid)?
                .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

            let identity = identity_of(&row)?;
            let (access_token, refresh_token) = issue_pair(&state, &identity)?;
            state.db.rotate_refresh_token(
                &record.refresh_token,
                &row.uuid,
                &refresh_token,
                None,
                user_agent.as_deref(),
                &refresh_expiry().to_rfc3339(),
            )?;

            Ok(TokenPairResponse {
                user: user_response(&row)?,
                access_token,
                refresh_token,
            })
        }
    })
    .await?;

    Ok(Json(response))
}

fn issue_pair(state: &AppState, identity: &Identity) -> Result<(String, String), ApiError> {
    let access = state
        .keys
        .issue_access(identity)
        .map_err(|e| ApiError::Unexpected(anyhow!("failed to sign access token: {}", e)))?;
    let refresh = state
        .keys
        .issue_refresh(identity.id)
        .map_err(|e| ApiError::Unexpected(anyhow!("failed to sign refresh token: {}", e)))?;
    Ok((access, refresh))
}

fn refresh_expiry() -> chrono::DateTime<Utc> {
    Utc::now() + Duration::days(REFRESH_TOKEN_TTL_DAYS)
}

fn identity_of(row: &UserRow) -> Result<Identity, ApiError> {
    Ok(Identity {
        id: row
            .uuid
            .parse()
            .map_err(|e| ApiError::Unexpected(anyhow!("corrupt user uuid '{}': {}", row.uuid, e)))?,
        role: Role::from_db(&row.role),
        email: row.email.clone(),
    })
}

pub(crate) fn user_response(row: &UserRow) -> Result<UserResponse, ApiError> {
    Ok(UserResponse {
        uuid: row
            .uuid
            .parse()
            .map_err(|e| ApiError::Unexpected(anyhow!("corrupt user uuid '{}': {}", row.uuid, e)))?,
        email: row.email.clone(),
        display_name: row.display_name.clone(),
        role: Role::from_db(&row.role),
        branch: row.branch.clone(),
        team: row.team.clone(),
        created_at: row.created_at.clone(),
    })
}

/// Cheap structural check; real verification happens when mail is sent.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape_check() {
        assert!(is_valid_email("dev@example.com"));
        assert!(is_valid_email("a.b+c@mail.example.co"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("dot@.example"));
    }
}
