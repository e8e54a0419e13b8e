//! PostgreSQL persistence layer.
//!
//! Every multi-row mutation runs inside a transaction; single-row balance
//! changes rely on SQL `WHERE` predicates to enforce invariants atomically.

pub mod orders;
pub mod users;
pub mod withdrawals;

pub use orders::OrderStore;
pub use users::UserStore;
pub use withdrawals::WithdrawalStore;

use crate::models::{OrderId, UnknownOrderStatus, UserId};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    UnknownStatus(#[from] UnknownOrderStatus),
    #[error("order {0} not found")]
    OrderNotFound(OrderId),
    #[error("can't accrue points to user {0}")]
    AccrueFailed(UserId),
    #[error("login already exists")]
    LoginAlreadyExists,
    #[error("withdrawal already registered for this order")]
    WithdrawalAlreadyRegistered,
    #[error("insufficient funds")]
    InsufficientFunds,
}

/// PostgreSQL connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(database_uri: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_uri)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Postgres unique-constraint violation (SQLSTATE 23505).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
