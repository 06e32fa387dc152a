//! PostgreSQL store implementation.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.
//!
//! Every mutation runs in a single transaction. `sqlx::Transaction` rolls back
//! on drop, so early returns never leave a transaction open.

use crate::error::StoreError;
use crate::repository::{BatchOutcome, OrderRepository, Store, UserRepository, WithdrawalRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gophermart_domain::{
    Balance, Login, Order, OrderNumber, OrderStatus, PasswordHash, Points, SessionToken,
    StatusUpdate, User, Withdrawal,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Connection, Executor, PgPool, Postgres, Row};
use tracing::{debug, warn};

/// PostgreSQL-backed ledger store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool to `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Remap a unique violation to a duplicate of the given entity
fn duplicate_as(err: sqlx::Error, entity_type: &str, id: &str) -> StoreError {
    match StoreError::from(err) {
        StoreError::Duplicate { .. } => StoreError::duplicate(entity_type, id),
        other => other,
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn parse_user_row(row: &PgRow) -> Result<User, StoreError> {
    let login: String = row.try_get("login")?;
    let password_hash: String = row.try_get("password_hash")?;
    let session_token: String = row.try_get("session_token")?;

    Ok(User {
        login: Login::new(login)?,
        password_hash: PasswordHash::from_stored(password_hash)?,
        session_token: SessionToken::from_string(session_token),
    })
}

fn parse_order_row(row: &PgRow) -> Result<Order, StoreError> {
    let number: String = row.try_get("number")?;
    let login: String = row.try_get("login")?;
    let status: String = row.try_get("status")?;
    let accrual: Decimal = row.try_get("accrual")?;
    let uploaded_at: DateTime<Utc> = row.try_get("uploaded_at")?;

    let status = status.parse::<OrderStatus>().map_err(|e| {
        StoreError::Deserialization(format!("Order {} has invalid status: {}", number, e))
    })?;
    let accrual = Points::new(accrual).map_err(|e| {
        StoreError::Deserialization(format!("Order {} has invalid accrual: {}", number, e))
    })?;

    Ok(Order {
        number: OrderNumber::from_stored(number),
        owner: Login::new(login)?,
        status,
        accrual,
        uploaded_at,
    })
}

fn parse_withdrawal_row(row: &PgRow) -> Result<Withdrawal, StoreError> {
    let order: String = row.try_get("order_number")?;
    let login: String = row.try_get("login")?;
    let sum: Decimal = row.try_get("sum")?;
    let processed_at: DateTime<Utc> = row.try_get("processed_at")?;

    let sum = Points::positive(sum).map_err(|e| {
        StoreError::Deserialization(format!("Withdrawal {} has invalid sum: {}", order, e))
    })?;

    Ok(Withdrawal {
        order: OrderNumber::from_stored(order),
        sum,
        owner: Login::new(login)?,
        processed_at,
    })
}

/// Both balance sums in one statement, so they come from one snapshot
async fn query_balance<'e, E>(executor: E, owner: &Login) -> Result<Balance, StoreError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE((SELECT SUM(accrual) FROM orders
                      WHERE login = $1 AND status = 'PROCESSED'), 0) AS accrued,
            COALESCE((SELECT SUM(sum) FROM withdrawals
                      WHERE login = $1), 0) AS withdrawn
        "#,
    )
    .bind(owner.as_str())
    .fetch_one(executor)
    .await?;

    let accrued: Decimal = row.try_get("accrued")?;
    let withdrawn: Decimal = row.try_get("withdrawn")?;
    Ok(Balance::from_sums(accrued, withdrawn))
}

// =============================================================================
// User Repository Implementation
// =============================================================================

#[async_trait]
impl UserRepository for PgStore {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (login, password_hash, session_token)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user.login.as_str())
        .bind(user.password_hash.as_str())
        .bind(user.session_token.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_as(e, "user", user.login.as_str()))?;

        Ok(())
    }

    async fn find_by_login(&self, login: &Login) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT login, password_hash, session_token FROM users WHERE login = $1",
        )
        .bind(login.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_user_row).transpose()
    }

    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT login, password_hash, session_token FROM users WHERE session_token = $1",
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_user_row).transpose()
    }

    async fn update_session(&self, login: &Login, token: &SessionToken) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET session_token = $2 WHERE login = $1")
            .bind(login.as_str())
            .bind(token.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("user", login.as_str()));
        }
        Ok(())
    }
}

// =============================================================================
// Order Repository Implementation
// =============================================================================

#[async_trait]
impl OrderRepository for PgStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (number, login, status, accrual, uploaded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.number.as_str())
        .bind(order.owner.as_str())
        .bind(order.status.as_str())
        .bind(order.accrual.as_decimal())
        .bind(order.uploaded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_as(e, "order", order.number.as_str()))?;

        Ok(())
    }

    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            "SELECT number, login, status, accrual, uploaded_at FROM orders WHERE number = $1",
        )
        .bind(number.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_order_row).transpose()
    }

    async fn find_by_owner(&self, owner: &Login) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT number, login, status, accrual, uploaded_at
            FROM orders
            WHERE login = $1
            ORDER BY uploaded_at ASC, number ASC
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_order_row).collect()
    }

    async fn find_unsettled(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT number, login, status, accrual, uploaded_at
            FROM orders
            WHERE status IN ('NEW', 'PROCESSING')
            ORDER BY uploaded_at ASC, number ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_order_row).collect()
    }

    async fn apply_updates(&self, updates: &[StatusUpdate]) -> Result<BatchOutcome, StoreError> {
        let mut outcome = BatchOutcome::default();
        if updates.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await?;

        for update in updates {
            if update.status == OrderStatus::New {
                outcome.skipped += 1;
                continue;
            }

            // Savepoint per row: a failed row must not abort its siblings
            let mut row_tx = Connection::begin(&mut *tx).await?;
            let result = sqlx::query(
                r#"
                UPDATE orders
                SET status = $2, accrual = $3
                WHERE number = $1 AND status IN ('NEW', 'PROCESSING')
                "#,
            )
            .bind(update.number.as_str())
            .bind(update.status.as_str())
            .bind(update.accrual.as_decimal())
            .execute(&mut *row_tx)
            .await;

            match result {
                Ok(done) if done.rows_affected() == 0 => {
                    debug!(order = %update.number, "Order already final or gone, update skipped");
                    row_tx.commit().await?;
                    outcome.skipped += 1;
                },
                Ok(_) => {
                    row_tx.commit().await?;
                    outcome.applied += 1;
                },
                Err(e) => {
                    warn!(order = %update.number, error = %e, "Failed to write order update");
                    row_tx.rollback().await?;
                    outcome.failed += 1;
                },
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }
}

// =============================================================================
// Withdrawal Repository Implementation
// =============================================================================

#[async_trait]
impl WithdrawalRepository for PgStore {
    async fn withdraw(&self, withdrawal: &Withdrawal) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serializes withdrawals of one owner until commit
        let locked = sqlx::query("SELECT login FROM users WHERE login = $1 FOR UPDATE")
            .bind(withdrawal.owner.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(StoreError::not_found("user", withdrawal.owner.as_str()));
        }

        let balance = query_balance(&mut *tx, &withdrawal.owner).await?;
        if !balance.covers(withdrawal.sum) {
            return Err(StoreError::InsufficientFunds {
                requested: withdrawal.sum.as_decimal(),
                available: balance.current,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO withdrawals (order_number, login, sum, processed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(withdrawal.order.as_str())
        .bind(withdrawal.owner.as_str())
        .bind(withdrawal.sum.as_decimal())
        .bind(withdrawal.processed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| duplicate_as(e, "withdrawal", withdrawal.order.as_str()))?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_owner(&self, owner: &Login) -> Result<Vec<Withdrawal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_number, login, sum, processed_at
            FROM withdrawals
            WHERE login = $1
            ORDER BY processed_at ASC
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_withdrawal_row).collect()
    }
}

// =============================================================================
// Store Implementation
// =============================================================================

#[async_trait]
impl Store for PgStore {
    fn users(&self) -> &dyn UserRepository {
        self
    }

    fn orders(&self) -> &dyn OrderRepository {
        self
    }

    fn withdrawals(&self) -> &dyn WithdrawalRepository {
        self
    }

    async fn balance(&self, owner: &Login) -> Result<Balance, StoreError> {
        query_balance(&self.pool, owner).await
    }
}

// =============================================================================
// Tests
// =============================================================================
