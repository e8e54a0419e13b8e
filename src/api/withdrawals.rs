//! Withdrawal history endpoint.

use axum::Extension;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::ApiError;
use super::state::AppState;
use crate::auth::AuthUser;

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub order: String,
    pub sum: f64,
    pub processed_at: DateTime<Utc>,
}

/// `GET /api/user/withdrawals`, newest first; 204 when the user has none.
pub async fn list_withdrawals(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let withdrawals = state.withdrawals.find_by_user(user_id).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<WithdrawalResponse> = withdrawals
        .into_iter()
        .map(|withdrawal| WithdrawalResponse {
            order: withdrawal.order_id.to_string(),
            sum: withdrawal.sum.as_value(),
            processed_at: withdrawal.created_at,
        })
        .collect();

    Ok(Json(body).into_response())
}
