//! Durable storage for users, orders and the balance ledger.
//!
//! - `in_memory.rs`: single-process backend (tests, local runs without Postgres)
//! - `postgres.rs`: sqlx/Postgres backend with embedded migrations
//!
//! Both backends implement all three store traits on one struct so that an
//! order status change and its ledger credit can commit together.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use loyalty_auth::User;
use loyalty_core::{DomainError, UserId};
use loyalty_ledger::{Balance, LedgerEntry, Withdrawal, WithdrawalError};
use loyalty_orders::{Order, OrderNumber, OrderStatus};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} was uploaded by another user")]
    OrderOwnedByAnotherUser(OrderNumber),

    #[error("order {0} not found")]
    OrderNotFound(OrderNumber),

    #[error("login {0} is already taken")]
    LoginTaken(String),

    #[error(transparent)]
    Withdrawal(#[from] WithdrawalError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result of uploading an order number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderCreation {
    /// A new `NEW` order was stored.
    Created(Order),
    /// The same user had already uploaded this number; nothing changed.
    AlreadyOwned(Order),
}

impl OrderCreation {
    pub fn order(&self) -> &Order {
        match self {
            OrderCreation::Created(order) | OrderCreation::AlreadyOwned(order) => order,
        }
    }
}

/// Outcome of a successful withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalReceipt {
    /// The appended debit entry.
    pub entry: LedgerEntry,
    /// The order anchoring the withdrawal, new or pre-existing.
    pub anchor: OrderCreation,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with [`StoreError::LoginTaken`] when the login exists.
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError>;

    async fn user_by_login(&self, login: &str) -> Result<Option<User>, StoreError>;

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Idempotent per owner; another user's number is
    /// [`StoreError::OrderOwnedByAnotherUser`].
    async fn create_order(
        &self,
        number: &OrderNumber,
        user_id: UserId,
        uploaded_at: DateTime<Utc>,
    ) -> Result<OrderCreation, StoreError>;

    async fn order(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError>;

    /// Compare-and-set status change.
    ///
    /// Returns `Ok(false)` when the stored status is no longer `from`. Entering
    /// `PROCESSED` with a positive accrual appends the matching credit entry
    /// atomically.
    async fn transition(
        &self,
        number: &OrderNumber,
        from: OrderStatus,
        to: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<bool, StoreError>;

    /// Orders of `user_id`, oldest upload first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError>;

    /// Orders still `NEW` or `PROCESSING`, oldest upload first.
    async fn unfinished_orders(&self) -> Result<Vec<Order>, StoreError>;

    /// Cheap liveness probe of the backend.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn balance(&self, user_id: UserId) -> Result<Balance, StoreError>;

    /// Under the user's withdrawal lock: check funds, create or confirm the
    /// order anchor and append the debit, all or nothing.
    async fn withdraw(&self, withdrawal: &Withdrawal) -> Result<WithdrawalReceipt, StoreError>;

    /// Debit entries of `user_id`, newest first.
    async fn withdrawals(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// The three stores, backed by one implementation.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub orders: Arc<dyn OrderStore>,
    pub ledger: Arc<dyn LedgerStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self::from_backend(InMemoryStore::arc())
    }

    /// Connect, run migrations and wrap the pool.
    pub async fn postgres(database_uri: &str) -> Result<Self, StoreError> {
        let store = PostgresStore::connect(database_uri).await?;
        Ok(Self::from_backend(Arc::new(store)))
    }

    /// Postgres when `database_uri` is set, in-memory otherwise.
    pub async fn connect(database_uri: Option<&str>) -> Result<Self, StoreError> {
        match database_uri {
            Some(uri) => Self::postgres(uri).await,
            None => {
                tracing::warn!("no database configured; using in-memory stores");
                Ok(Self::in_memory())
            }
        }
    }

    fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: UserStore + OrderStore + LedgerStore + 'static,
    {
        Self {
            users: backend.clone(),
            orders: backend.clone(),
            ledger: backend,
        }
    }
}

/// Reject transitions the status machine does not allow, and accruals on
/// anything but `PROCESSED`.
pub(crate) fn check_transition(
    from: OrderStatus,
    to: OrderStatus,
    accrual: Option<Decimal>,
) -> Result<(), StoreError> {
    if !from.can_transition_to(to) {
        return Err(DomainError::invariant(format!("illegal order transition {from} -> {to}")).into());
    }
    if accrual.is_some() && to != OrderStatus::Processed {
        return Err(DomainError::invariant(format!("accrual can only be set when entering {}", OrderStatus::Processed)).into());
    }
    Ok(())
}
