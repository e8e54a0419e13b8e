//! Registration and login endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::state::AppState;
use crate::auth::AuthError;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    validate_registration(&credentials)?;

    let token = state
        .auth
        .register(&credentials.login, &credentials.password)
        .await
        .map_err(|err| match err {
            AuthError::LoginAlreadyExists => ApiError::conflict("login already exists"),
            other => {
                tracing::error!(error = %other, "can't register user");
                ApiError::internal()
            }
        })?;

    Ok(authorized(token))
}

pub async fn login(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    if credentials.login.is_empty() || credentials.password.is_empty() {
        return Err(ApiError::bad_request("login and password are required"));
    }

    let token = state
        .auth
        .login(&credentials.login, &credentials.password)
        .await
        .map_err(|err| match err {
            AuthError::InvalidCredentials => ApiError::unauthorized("invalid credentials"),
            other => {
                tracing::error!(error = %other, "can't authorize user");
                ApiError::internal()
            }
        })?;

    Ok(authorized(token))
}

/// Token goes into both the body and the Authorization response header.
fn authorized(token: String) -> impl IntoResponse {
    (
        [(header::AUTHORIZATION, format!("Bearer {token}"))],
        Json(TokenResponse {
            access_token: token,
        }),
    )
}

fn validate_registration(credentials: &Credentials) -> Result<(), ApiError> {
    let login_ok = (3..=32).contains(&credentials.login.len())
        && credentials
            .login
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !login_ok {
        return Err(ApiError::bad_request(
            "login must be 3-32 characters of [0-9A-Za-z_-]",
        ));
    }

    if !(8..=64).contains(&credentials.password.len()) {
        return Err(ApiError::bad_request("password must be 8-64 characters"));
    }

    Ok(())
}
