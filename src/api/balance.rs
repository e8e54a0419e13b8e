//! Balance inquiry and withdrawal endpoints.

use axum::Extension;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use super::error::{ApiError, MessageBody};
use super::state::AppState;
use crate::auth::AuthUser;
use crate::luhn;
use crate::models::OrderId;
use crate::money::Amount;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub current: f64,
    pub withdrawn: f64,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: f64,
}

pub async fn balance(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user = state.users.find_by_id(user_id).await?.ok_or_else(|| {
        tracing::error!(user_id, "authenticated user not found");
        ApiError::internal()
    })?;

    Ok(Json(BalanceResponse {
        current: user.balance.as_value(),
        withdrawn: user.withdrawn.as_value(),
    }))
}

pub async fn withdraw(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(request): Json<WithdrawRequest>,
) -> Result<Json<MessageBody>, ApiError> {
    let order_id: OrderId = request
        .order
        .trim()
        .parse()
        .map_err(|_| ApiError::unprocessable("invalid order number"))?;
    if !luhn::is_valid(order_id) {
        return Err(ApiError::unprocessable("invalid order number"));
    }

    let sum = Amount::from_value(request.sum);
    if !(request.sum > 0.0) || sum.is_zero() {
        return Err(ApiError::bad_request("sum must be positive"));
    }

    state
        .withdrawals
        .withdraw(order_id, user_id, sum)
        .await
        .map_err(|err| match err {
            StoreError::InsufficientFunds => ApiError::payment_required("insufficient funds"),
            StoreError::WithdrawalAlreadyRegistered => {
                ApiError::conflict("withdrawal already registered for this order")
            }
            other => other.into(),
        })?;

    Ok(Json(MessageBody::new("withdrawal successfully registered")))
}
