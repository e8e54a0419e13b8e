use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::models::UserId;

/// Authenticated caller, injected into request extensions by [`require_auth`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("invalid credentials"))?;

    let claims = state
        .auth
        .verify_token(token)
        .map_err(|_| ApiError::unauthorized("invalid credentials"))?;
    let user_id = claims
        .user_id()
        .map_err(|_| ApiError::unauthorized("invalid credentials"))?;

    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}
