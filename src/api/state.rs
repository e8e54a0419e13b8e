use std::sync::Arc;

use crate::auth::AuthService;
use crate::models::OrderId;
use crate::queue::Queue;
use crate::store::{OrderStore, UserStore, WithdrawalStore};

/// Shared handler state. Stores are cheap clones around the connection pool;
/// the order queue feeds freshly registered orders into the accrual pipeline.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub orders: OrderStore,
    pub users: UserStore,
    pub withdrawals: WithdrawalStore,
    pub order_queue: Queue<OrderId>,
}
