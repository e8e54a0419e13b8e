//! Order persistence: registration, listings, recovery and the accrual
//! transaction that credits user balances.

use super::StoreError;
use crate::accrual::writer::{AccrualStore, StatusStore};
use crate::models::{Order, OrderId, OrderStatus, UserId};
use crate::money::Amount;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;

const ORDER_COLUMNS: &str = "id, user_id, status, accrual, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i64,
    user_id: i32,
    status: String,
    accrual: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id as OrderId,
            user_id: row.user_id as UserId,
            status: row.status.parse()?,
            accrual: Amount::from_raw(row.accrual as u64),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct OrderStore {
    pool: PgPool,
}

impl OrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new order in NEW status, or return the existing row when the
    /// number was already uploaded. The boolean reports whether the order was
    /// created by this call.
    pub async fn create_or_find(
        &self,
        id: OrderId,
        user_id: UserId,
    ) -> Result<(Order, bool), StoreError> {
        let inserted = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (id, user_id) VALUES ($1, $2) \
             ON CONFLICT (id) DO NOTHING \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id as i64)
        .bind(user_id as i32)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row.try_into()?, true));
        }

        let existing = self
            .find_by_id(id)
            .await?
            .ok_or(StoreError::OrderNotFound(id))?;
        Ok((existing, false))
    }

    pub async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    /// All orders of one user, newest first.
    pub async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id as i32)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    /// Ids of all orders that have not reached a terminal status, oldest
    /// first. Feeds the order queue at start-up.
    pub async fn find_unprocessed_ids(&self) -> Result<Vec<OrderId>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM orders WHERE status IN ('NEW', 'PROCESSING') ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|id| id as OrderId).collect())
    }

    /// One UPDATE covering the whole batch of ids.
    pub async fn update_status(
        &self,
        ids: &[OrderId],
        status: OrderStatus,
    ) -> Result<(), StoreError> {
        let ids: Vec<i64> = ids.iter().map(|&id| id as i64).collect();

        sqlx::query("UPDATE orders SET status = $1, updated_at = now() WHERE id = ANY($2)")
            .bind(status.as_str())
            .bind(&ids)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Apply a batch of accruals in a single transaction: each order becomes
    /// PROCESSED with its rounded value, and non-zero values are credited to
    /// the owner's balance. Any failure rolls back the whole batch.
    pub async fn accrue_batch(&self, accruals: &HashMap<OrderId, f64>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for (&order_id, &value) in accruals {
            let row = sqlx::query_as::<_, OrderRow>(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
            ))
            .bind(order_id as i64)
            .fetch_optional(&mut *tx)
            .await?;
            let order: Order = row
                .ok_or(StoreError::OrderNotFound(order_id))?
                .try_into()?;

            let accrual = Amount::from_value(value);
            sqlx::query(
                "UPDATE orders SET status = $1, accrual = $2, updated_at = now() WHERE id = $3",
            )
            .bind(OrderStatus::Processed.as_str())
            .bind(accrual.to_raw() as i64)
            .bind(order_id as i64)
            .execute(&mut *tx)
            .await?;

            if !accrual.is_zero() {
                let updated = sqlx::query(
                    "UPDATE users SET balance = balance + $1, updated_at = now() WHERE id = $2",
                )
                .bind(accrual.to_raw() as i64)
                .bind(order.user_id as i32)
                .execute(&mut *tx)
                .await?;

                if updated.rows_affected() != 1 {
                    // Dropping the transaction rolls the batch back.
                    return Err(StoreError::AccrueFailed(order.user_id));
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for OrderStore {
    async fn update_status(&self, ids: &[OrderId], status: OrderStatus) -> Result<(), StoreError> {
        OrderStore::update_status(self, ids, status).await
    }
}

#[async_trait]
impl AccrualStore for OrderStore {
    async fn accrue_batch(&self, accruals: HashMap<OrderId, f64>) -> Result<(), StoreError> {
        OrderStore::accrue_batch(self, &accruals).await
    }
}
