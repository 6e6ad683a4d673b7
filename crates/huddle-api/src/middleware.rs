use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and verify the bearer token, then stash the caller's identity as
/// a request extension for handlers to pick up.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Auth("missing or malformed Authorization header".into()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Auth("missing or malformed Authorization header".into()))?;

    let claims = state
        .keys
        .verify_access(token)
        .map_err(|e| ApiError::Auth(e.to_string()))?;

    req.extensions_mut().insert(claims.identity());
    Ok(next.run(req).await)
}
