//! HTTP API: thin axum adapters around the stores and the accrual pipeline.

pub mod auth;
pub mod balance;
pub mod error;
pub mod orders;
pub mod state;
pub mod withdrawals;

pub use error::ApiError;
pub use state::AppState;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/api/user/orders",
            post(orders::register_order).get(orders::list_orders),
        )
        .route("/api/user/balance", get(balance::balance))
        .route("/api/user/balance/withdraw", post(balance::withdraw))
        .route("/api/user/withdrawals", get(withdrawals::list_withdrawals))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ));

    Router::new()
        .route("/api/user/register", post(auth::register))
        .route("/api/user/login", post(auth::login))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new())
        .with_state(state)
}
