//! User persistence and the atomic balance row operations.

use super::{StoreError, is_unique_violation};
use crate::models::{User, UserId};
use crate::money::Amount;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

const USER_COLUMNS: &str = "id, login, password, balance, withdrawn, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i32,
    login: String,
    password: String,
    balance: i64,
    withdrawn: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id as UserId,
            login: row.login,
            password_hash: row.password,
            balance: Amount::from_raw(row.balance as u64),
            withdrawn: Amount::from_raw(row.withdrawn as u64),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, login: &str, password_hash: &str) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (login, password) VALUES ($1, $2) RETURNING {USER_COLUMNS}"
        ))
        .bind(login)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::LoginAlreadyExists
            } else {
                err.into()
            }
        })?;

        Ok(row.into())
    }

    pub async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE login = $1"
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    pub async fn find_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id as i32)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }
}
