//! Postgres backend.
//!
//! Orders and ledger entries live in `orders` and `balance_logs`; the balance
//! is always aggregated from `balance_logs`, never cached. Withdrawals lock the
//! user's row (`SELECT ... FOR UPDATE`) so concurrent withdrawals of one user
//! run one after another.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::{info, instrument};
use uuid::Uuid;

use loyalty_auth::User;
use loyalty_core::UserId;
use loyalty_ledger::{Balance, LedgerEntry, Withdrawal};
use loyalty_orders::{Order, OrderNumber, OrderStatus};

use super::{
    LedgerStore, OrderCreation, OrderStore, StoreError, UserStore, WithdrawalReceipt,
    check_transition,
};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const MAX_CONNECTIONS: u32 = 10;

/// Postgres-backed implementation of every store trait.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

#[derive(FromRow)]
struct OrderRow {
    number: String,
    user_id: Uuid,
    status: String,
    accrual: Decimal,
    uploaded_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order::restore(
            OrderNumber::parse(&row.number)?,
            UserId::from_uuid(row.user_id),
            row.status.parse::<OrderStatus>()?,
            row.accrual,
            row.uploaded_at,
        ))
    }
}

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    login: String,
    password_hash: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId::from_uuid(row.id),
            login: row.login,
            password_hash: row.password_hash,
        }
    }
}

#[derive(FromRow)]
struct EntryRow {
    order_number: String,
    user_id: Uuid,
    amount: Decimal,
    processed_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            order_number: OrderNumber::parse(&row.order_number)?,
            user_id: UserId::from_uuid(row.user_id),
            amount: row.amount,
            processed_at: row.processed_at,
        })
    }
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool and apply pending migrations.
    #[instrument(skip_all, err)]
    pub async fn connect(database_uri: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_uri)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Storage(format!("migrations failed: {e}")))?;
        info!("database migrations applied");

        Ok(Self::new(pool))
    }
}

/// Insert a `NEW` order unless the number exists, then report ownership.
async fn insert_order_if_absent(
    conn: &mut PgConnection,
    number: &OrderNumber,
    user_id: UserId,
    uploaded_at: DateTime<Utc>,
) -> Result<OrderCreation, StoreError> {
    let inserted = sqlx::query_as::<_, OrderRow>(
        r#"
        INSERT INTO orders (number, user_id, status, accrual, uploaded_at)
        VALUES ($1, $2, $3, 0, $4)
        ON CONFLICT (number) DO NOTHING
        RETURNING number, user_id, status, accrual, uploaded_at
        "#,
    )
    .bind(number.as_str())
    .bind(user_id.as_uuid())
    .bind(OrderStatus::New.as_str())
    .bind(uploaded_at)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_order", e))?;

    if let Some(row) = inserted {
        return Ok(OrderCreation::Created(row.try_into()?));
    }

    let existing: Order = sqlx::query_as::<_, OrderRow>(
        r#"
        SELECT number, user_id, status, accrual, uploaded_at
        FROM orders
        WHERE number = $1
        "#,
    )
    .bind(number.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_existing_order", e))?
    .try_into()?;

    if existing.is_owned_by(user_id) {
        Ok(OrderCreation::AlreadyOwned(existing))
    } else {
        Err(StoreError::OrderOwnedByAnotherUser(number.clone()))
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    #[instrument(skip(self, password_hash), err)]
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, login, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, login, password_hash
            "#,
        )
        .bind(UserId::new().as_uuid())
        .bind(login)
        .bind(password_hash)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::LoginTaken(login.to_string())
            } else {
                map_sqlx_error("create_user", e)
            }
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self), err)]
    async fn user_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, login, password_hash FROM users WHERE login = $1",
        )
        .bind(login)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_by_login", e))?;

        Ok(row.map(User::from))
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, login, password_hash FROM users WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_by_id", e))?;

        Ok(row.map(User::from))
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    #[instrument(skip(self), fields(order_number = %number, user_id = %user_id), err)]
    async fn create_order(
        &self,
        number: &OrderNumber,
        user_id: UserId,
        uploaded_at: DateTime<Utc>,
    ) -> Result<OrderCreation, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        insert_order_if_absent(&mut *conn, number, user_id, uploaded_at).await
    }

    #[instrument(skip(self), fields(order_number = %number), err)]
    async fn order(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE number = $1
            "#,
        )
        .bind(number.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("order", e))?
        .map(Order::try_from)
        .transpose()
    }

    #[instrument(skip(self), fields(order_number = %number, from = %from, to = %to), err)]
    async fn transition(
        &self,
        number: &OrderNumber,
        from: OrderStatus,
        to: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<bool, StoreError> {
        check_transition(from, to, accrual)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transition", e))?;

        let updated: Option<(Uuid, Decimal)> = sqlx::query_as(
            r#"
            UPDATE orders
            SET status = $3, accrual = COALESCE($4, accrual)
            WHERE number = $1 AND status = $2
            RETURNING user_id, accrual
            "#,
        )
        .bind(number.as_str())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(accrual)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_order_status", e))?;

        let Some((user_id, accrual)) = updated else {
            let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM orders WHERE number = $1")
                .bind(number.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("order_exists", e))?;
            return match exists {
                Some(_) => Ok(false),
                None => Err(StoreError::OrderNotFound(number.clone())),
            };
        };

        if to == OrderStatus::Processed && accrual > Decimal::ZERO {
            sqlx::query(
                r#"
                INSERT INTO balance_logs (order_number, user_id, amount)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(number.as_str())
            .bind(user_id)
            .bind(accrual)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("credit_accrual", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transition", e))?;
        Ok(true)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at ASC, number ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("orders_for_user", e))?
        .into_iter()
        .map(Order::try_from)
        .collect()
    }

    #[instrument(skip(self), err)]
    async fn unfinished_orders(&self) -> Result<Vec<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE status IN ('NEW', 'PROCESSING')
            ORDER BY uploaded_at ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("unfinished_orders", e))?
        .into_iter()
        .map(Order::try_from)
        .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn balance(&self, user_id: UserId) -> Result<Balance, StoreError> {
        let (current, withdrawn): (Decimal, Decimal) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(amount), 0) AS current,
                COALESCE(SUM(CASE WHEN amount < 0 THEN -amount ELSE 0 END), 0) AS withdrawn
            FROM balance_logs
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("balance", e))?;

        Ok(Balance { current, withdrawn })
    }

    #[instrument(
        skip(self, withdrawal),
        fields(
            user_id = %withdrawal.user_id(),
            order_number = %withdrawal.order_number(),
            amount = %withdrawal.amount()
        ),
        err
    )]
    async fn withdraw(&self, withdrawal: &Withdrawal) -> Result<WithdrawalReceipt, StoreError> {
        let user_id = withdrawal.user_id();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_withdraw", e))?;

        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_user", e))?;
        if locked.is_none() {
            return Err(StoreError::Storage(format!("unknown user {user_id}")));
        }

        let current: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM balance_logs WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("current_balance", e))?;
        withdrawal.check_funds(current)?;

        let anchor =
            insert_order_if_absent(&mut *tx, withdrawal.order_number(), user_id, Utc::now()).await?;

        let processed_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO balance_logs (order_number, user_id, amount)
            VALUES ($1, $2, $3)
            RETURNING processed_at
            "#,
        )
        .bind(withdrawal.order_number().as_str())
        .bind(user_id.as_uuid())
        .bind(-withdrawal.amount())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("append_withdrawal", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_withdraw", e))?;

        Ok(WithdrawalReceipt {
            entry: withdrawal.to_entry(processed_at),
            anchor,
        })
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn withdrawals(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT order_number, user_id, amount, processed_at
            FROM balance_logs
            WHERE user_id = $1 AND amount < 0
            ORDER BY processed_at DESC, id DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("withdrawals", e))?
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            StoreError::Storage(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Storage(format!("timed out waiting for a connection in {operation}"))
        }
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}
