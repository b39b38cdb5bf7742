use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use loyalty_auth::{AuthError, Credentials, Hs256Jwt, InvalidField, PasswordHasher};
use loyalty_core::DomainError;
use loyalty_infra::jobs::{OrderQueue, ShutdownSignal};
use loyalty_infra::storage::{
    LedgerStore, OrderCreation, OrderStore, StoreError, Stores, UserStore,
};
use loyalty_ledger::{Balance, LedgerEntry, Withdrawal, WithdrawalError};
use loyalty_orders::{Order, OrderNumber};

use crate::context::UserContext;

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppServices {
    pub users: Arc<dyn UserStore>,
    pub orders: Arc<dyn OrderStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub queue: Arc<OrderQueue>,
    pub jwt: Arc<Hs256Jwt>,
    pub hasher: PasswordHasher,
    /// Cancels enqueues that wait on a full queue during shutdown.
    pub shutdown: ShutdownSignal,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid credentials")]
    InvalidFields(Vec<InvalidField>),

    #[error("invalid order number: {0}")]
    InvalidOrderNumber(DomainError),

    #[error(transparent)]
    InvalidAmount(WithdrawalError),

    #[error("login is already taken")]
    LoginTaken,

    #[error("wrong login or password")]
    BadCredentials,

    #[error("order was uploaded by another user")]
    OrderOwnedByAnotherUser,

    #[error(transparent)]
    InsufficientFunds(WithdrawalError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LoginTaken(_) => ServiceError::LoginTaken,
            StoreError::OrderOwnedByAnotherUser(_) => ServiceError::OrderOwnedByAnotherUser,
            StoreError::Withdrawal(e @ WithdrawalError::InsufficientFunds { .. }) => {
                ServiceError::InsufficientFunds(e)
            }
            StoreError::Withdrawal(e) => ServiceError::InvalidAmount(e),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

/// Outcome of `POST /api/user/orders`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// First upload; processing has been scheduled.
    Accepted,
    /// The caller had already uploaded this number.
    AlreadySubmitted,
}

impl AppServices {
    pub fn new(
        stores: Stores,
        queue: Arc<OrderQueue>,
        jwt: Hs256Jwt,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            users: stores.users,
            orders: stores.orders,
            ledger: stores.ledger,
            queue,
            jwt: Arc::new(jwt),
            hasher: PasswordHasher::default(),
            shutdown,
        }
    }

    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Create an account and return a session token for it.
    pub async fn register(&self, credentials: Credentials) -> Result<String, ServiceError> {
        credentials.validate().map_err(ServiceError::InvalidFields)?;

        let hasher = self.hasher;
        let password = credentials.password;
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))??;

        let user = self.users.create_user(&credentials.login, &hash).await?;
        info!(user_id = %user.id, login = %user.login, "user registered");
        Ok(self.jwt.issue(user.id, Utc::now())?)
    }

    /// Check a login/password pair and return a session token.
    pub async fn login(&self, credentials: Credentials) -> Result<String, ServiceError> {
        credentials.validate().map_err(ServiceError::InvalidFields)?;

        let user = self
            .users
            .user_by_login(&credentials.login)
            .await?
            .ok_or(ServiceError::BadCredentials)?;

        let hasher = self.hasher;
        let password = credentials.password;
        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))??;
        if !matches {
            return Err(ServiceError::BadCredentials);
        }

        Ok(self.jwt.issue(user.id, Utc::now())?)
    }

    /// Store an uploaded order number and schedule its processing.
    ///
    /// A repeat upload of an unfinished order schedules it again; the queue
    /// ignores it while a job for it is still alive.
    pub async fn submit_order(
        &self,
        user: &UserContext,
        raw: &str,
    ) -> Result<Submission, ServiceError> {
        let number = OrderNumber::parse(raw.trim()).map_err(ServiceError::InvalidOrderNumber)?;

        match self.orders.create_order(&number, user.user_id(), Utc::now()).await? {
            OrderCreation::Created(order) => {
                info!(order_number = %number, login = user.login(), "order uploaded");
                self.schedule(order).await;
                Ok(Submission::Accepted)
            }
            OrderCreation::AlreadyOwned(order) => {
                if !order.status().is_terminal() {
                    self.schedule(order).await;
                }
                Ok(Submission::AlreadySubmitted)
            }
        }
    }

    pub async fn user_orders(&self, user: &UserContext) -> Result<Vec<Order>, ServiceError> {
        Ok(self.orders.orders_for_user(user.user_id()).await?)
    }

    pub async fn balance(&self, user: &UserContext) -> Result<Balance, ServiceError> {
        Ok(self.ledger.balance(user.user_id()).await?)
    }

    /// Spend `sum` points against order `raw`.
    pub async fn withdraw(
        &self,
        user: &UserContext,
        raw: &str,
        sum: Decimal,
    ) -> Result<LedgerEntry, ServiceError> {
        let number = OrderNumber::parse(raw.trim()).map_err(ServiceError::InvalidOrderNumber)?;
        let withdrawal =
            Withdrawal::new(number, user.user_id(), sum).map_err(ServiceError::InvalidAmount)?;

        let receipt = self.ledger.withdraw(&withdrawal).await?;
        info!(
            order_number = %withdrawal.order_number(),
            login = user.login(),
            sum = %withdrawal.amount(),
            "points withdrawn"
        );

        if let OrderCreation::Created(anchor) = receipt.anchor {
            self.schedule(anchor).await;
        }
        Ok(receipt.entry)
    }

    pub async fn withdrawals(&self, user: &UserContext) -> Result<Vec<LedgerEntry>, ServiceError> {
        Ok(self.ledger.withdrawals(user.user_id()).await?)
    }

    pub async fn ping(&self) -> Result<(), ServiceError> {
        Ok(self.orders.ping().await?)
    }

    /// Queue `order`; the upload itself already succeeded, so failures are
    /// only logged and the startup sweep picks the order up later.
    async fn schedule(&self, order: Order) {
        let number = order.number().clone();
        if let Err(e) = self.queue.enqueue(order, &self.shutdown).await {
            warn!(order_number = %number, error = %e, "order stored but not queued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use loyalty_auth::JwtValidator;
    use loyalty_infra::jobs::{QueueConfig, Shutdown};
    use loyalty_orders::OrderStatus;

    struct Fixture {
        services: AppServices,
        _shutdown: Shutdown,
    }

    fn fixture() -> Fixture {
        let shutdown = Shutdown::new();
        let services = AppServices::new(
            Stores::in_memory(),
            OrderQueue::arc(QueueConfig::default()),
            Hs256Jwt::new("test-secret"),
            shutdown.signal(),
        )
        .with_hasher(PasswordHasher::with_cost(4));
        Fixture {
            services,
            _shutdown: shutdown,
        }
    }

    async fn signed_up(services: &AppServices, login: &str) -> UserContext {
        services
            .register(Credentials::new(login, "secret123"))
            .await
            .unwrap();
        let user = services.users.user_by_login(login).await.unwrap().unwrap();
        UserContext::new(user.id, user.login)
    }

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn register_then_login_issue_tokens_for_the_same_user() {
        let f = fixture();
        let token = f
            .services
            .register(Credentials::new("alice", "secret123"))
            .await
            .unwrap();
        let login_token = f
            .services
            .login(Credentials::new("alice", "secret123"))
            .await
            .unwrap();

        let now = Utc::now();
        let registered = f.services.jwt.validate(&token, now).unwrap();
        let logged_in = f.services.jwt.validate(&login_token, now).unwrap();
        assert_eq!(registered.sub, logged_in.sub);
    }

    #[tokio::test]
    async fn duplicate_login_and_wrong_password_are_rejected() {
        let f = fixture();
        signed_up(&f.services, "alice").await;

        assert!(matches!(
            f.services.register(Credentials::new("alice", "another1")).await,
            Err(ServiceError::LoginTaken)
        ));
        assert!(matches!(
            f.services.login(Credentials::new("alice", "wrong123")).await,
            Err(ServiceError::BadCredentials)
        ));
        assert!(matches!(
            f.services.login(Credentials::new("nobody", "secret123")).await,
            Err(ServiceError::BadCredentials)
        ));
    }

    #[tokio::test]
    async fn malformed_credentials_report_every_field() {
        let f = fixture();
        match f.services.register(Credentials::new("a!", "123")).await {
            Err(ServiceError::InvalidFields(fields)) => {
                assert!(fields.iter().any(|f| f.field == "login"));
                assert!(fields.iter().any(|f| f.field == "password"));
            }
            other => panic!("expected invalid fields, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn order_upload_is_idempotent_per_owner() {
        let f = fixture();
        let alice = signed_up(&f.services, "alice").await;
        let bob = signed_up(&f.services, "bobby").await;

        assert_eq!(
            f.services.submit_order(&alice, "125").await.unwrap(),
            Submission::Accepted
        );
        assert!(f.services.queue.is_tracked(&OrderNumber::parse("125").unwrap()));
        assert_eq!(
            f.services.submit_order(&alice, "125\n").await.unwrap(),
            Submission::AlreadySubmitted
        );
        assert!(matches!(
            f.services.submit_order(&bob, "125").await,
            Err(ServiceError::OrderOwnedByAnotherUser)
        ));
        assert!(matches!(
            f.services.submit_order(&alice, "126").await,
            Err(ServiceError::InvalidOrderNumber(_))
        ));

        let orders = f.services.user_orders(&alice).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert!(f.services.user_orders(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn withdrawal_spends_credited_points_and_queues_its_anchor() {
        let f = fixture();
        let alice = signed_up(&f.services, "alice").await;

        f.services.submit_order(&alice, "12345678903").await.unwrap();
        let earned = OrderNumber::parse("12345678903").unwrap();
        f.services
            .orders
            .transition(&earned, OrderStatus::New, OrderStatus::Processing, None)
            .await
            .unwrap();
        f.services
            .orders
            .transition(&earned, OrderStatus::Processing, OrderStatus::Processed, Some(dec("1000")))
            .await
            .unwrap();

        let entry = f.services.withdraw(&alice, "2377225624", dec("751")).await.unwrap();
        assert_eq!(entry.amount, dec("-751"));

        let balance = f.services.balance(&alice).await.unwrap();
        assert_eq!(balance.current, dec("249"));
        assert_eq!(balance.withdrawn, dec("751"));
        assert!(f.services.queue.is_tracked(&OrderNumber::parse("2377225624").unwrap()));
        assert_eq!(f.services.withdrawals(&alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn withdrawal_errors_are_classified() {
        let f = fixture();
        let alice = signed_up(&f.services, "alice").await;

        assert!(matches!(
            f.services.withdraw(&alice, "2377225624", dec("10")).await,
            Err(ServiceError::InsufficientFunds(_))
        ));
        assert!(matches!(
            f.services.withdraw(&alice, "2377225624", dec("-1")).await,
            Err(ServiceError::InvalidAmount(_))
        ));
        assert!(matches!(
            f.services.withdraw(&alice, "2377225624", dec("0.001")).await,
            Err(ServiceError::InvalidAmount(_))
        ));
        assert!(matches!(
            f.services.withdraw(&alice, "2377225625", dec("1")).await,
            Err(ServiceError::InvalidOrderNumber(_))
        ));
        assert!(f.services.withdrawals(&alice).await.unwrap().is_empty());
    }
}
