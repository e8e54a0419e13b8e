//! Order upload and listing endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::{ApiError, MessageBody};
use super::state::AppState;
use crate::auth::AuthUser;
use crate::luhn;
use crate::models::{OrderId, OrderStatus};

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
    pub uploaded_at: DateTime<Utc>,
}

/// `POST /api/user/orders` with a `text/plain` decimal order number.
pub async fn register_order(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    let is_plain_text = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("text/plain"))
        .unwrap_or(false);
    if !is_plain_text {
        return Err(ApiError::bad_request("invalid Content-Type"));
    }

    let order_id: OrderId = body
        .trim()
        .parse()
        .map_err(|_| ApiError::unprocessable("invalid order number"))?;
    if !luhn::is_valid(order_id) {
        return Err(ApiError::unprocessable("invalid order number"));
    }

    let (order, created) = state.orders.create_or_find(order_id, user_id).await?;

    if created {
        state.order_queue.push(order.id).await;
        return Ok((
            StatusCode::ACCEPTED,
            Json(MessageBody::new(
                "order has been successfully registered for processing",
            )),
        )
            .into_response());
    }

    if order.user_id == user_id {
        Ok((
            StatusCode::OK,
            Json(MessageBody::new("order already registered by current user")),
        )
            .into_response())
    } else {
        Err(ApiError::conflict("order already registered by another user"))
    }
}

/// `GET /api/user/orders`, newest first; 204 when the user has none.
pub async fn list_orders(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let orders = state.orders.find_by_user(user_id).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<OrderResponse> = orders
        .into_iter()
        .map(|order| OrderResponse {
            number: order.id.to_string(),
            accrual: (order.status == OrderStatus::Processed).then(|| order.accrual.as_value()),
            status: order.status,
            uploaded_at: order.created_at,
        })
        .collect();

    Ok(Json(body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Amount;

    #[test]
    fn accrual_is_reported_only_for_processed_orders() {
        let processed = OrderResponse {
            number: "1234566".to_string(),
            status: OrderStatus::Processed,
            accrual: Some(Amount::from_raw(123).as_value()),
            uploaded_at: Utc::now(),
        };
        let encoded = serde_json::to_value(&processed).unwrap();
        assert_eq!(encoded["number"], "1234566");
        assert_eq!(encoded["status"], "PROCESSED");
        assert_eq!(encoded["accrual"], 1.23);

        let fresh = OrderResponse {
            number: "1234566".to_string(),
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
        };
        let encoded = serde_json::to_value(&fresh).unwrap();
        assert!(encoded.get("accrual").is_none());
    }
}
