//! Withdrawal persistence.
//!
//! `withdraw` is the only path that decreases a user's balance. It runs in
//! one transaction: the withdrawal row insert and the guarded balance update
//! either both commit or both roll back.

use super::{StoreError, is_unique_violation};
use crate::models::{OrderId, UserId, Withdrawal};
use crate::money::Amount;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

const WITHDRAWAL_COLUMNS: &str = "order_id, user_id, sum, created_at";

#[derive(Debug, sqlx::FromRow)]
struct WithdrawalRow {
    order_id: i64,
    user_id: i32,
    sum: i64,
    created_at: DateTime<Utc>,
}

impl From<WithdrawalRow> for Withdrawal {
    fn from(row: WithdrawalRow) -> Self {
        Withdrawal {
            order_id: row.order_id as OrderId,
            user_id: row.user_id as UserId,
            sum: Amount::from_raw(row.sum as u64),
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct WithdrawalStore {
    pool: PgPool,
}

impl WithdrawalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Debit `sum` from the user's balance against `order_id`.
    ///
    /// Fails with `WithdrawalAlreadyRegistered` on an order-number collision
    /// and with `InsufficientFunds` when the guarded balance update affects
    /// no row; both abort the transaction.
    pub async fn withdraw(
        &self,
        order_id: OrderId,
        user_id: UserId,
        sum: Amount,
    ) -> Result<Withdrawal, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "INSERT INTO withdrawals (order_id, user_id, sum) VALUES ($1, $2, $3) \
             RETURNING {WITHDRAWAL_COLUMNS}"
        ))
        .bind(order_id as i64)
        .bind(user_id as i32)
        .bind(sum.to_raw() as i64)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::WithdrawalAlreadyRegistered
            } else {
                err.into()
            }
        })?;

        let updated = sqlx::query(
            "UPDATE users SET balance = balance - $1, withdrawn = withdrawn + $1, \
             updated_at = now() WHERE id = $2 AND balance >= $1",
        )
        .bind(sum.to_raw() as i64)
        .bind(user_id as i32)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            // Dropping the transaction rolls the insert back.
            return Err(StoreError::InsufficientFunds);
        }

        tx.commit().await?;
        Ok(row.into())
    }

    /// All withdrawals of one user, newest first.
    pub async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>, StoreError> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE user_id = $1 \
             ORDER BY created_at DESC"
        ))
        .bind(user_id as i32)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Withdrawal::from).collect())
    }
}
