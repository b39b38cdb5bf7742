use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use loyalty_auth::User;
use loyalty_core::UserId;
use loyalty_ledger::{Balance, LedgerEntry, Withdrawal};
use loyalty_orders::{Order, OrderNumber, OrderStatus};

use super::{
    LedgerStore, OrderCreation, OrderStore, StoreError, UserStore, WithdrawalReceipt,
    check_transition,
};

/// In-memory backend.
///
/// One lock guards all state, so every operation (withdrawals included) is a
/// single critical section.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    logins: HashMap<String, UserId>,
    orders: HashMap<OrderNumber, Order>,
    entries: Vec<LedgerEntry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn insert_order(
        &mut self,
        number: &OrderNumber,
        user_id: UserId,
        uploaded_at: DateTime<Utc>,
    ) -> Result<OrderCreation, StoreError> {
        match self.orders.get(number) {
            Some(existing) if existing.is_owned_by(user_id) => {
                Ok(OrderCreation::AlreadyOwned(existing.clone()))
            }
            Some(_) => Err(StoreError::OrderOwnedByAnotherUser(number.clone())),
            None => {
                let order = Order::new(number.clone(), user_id, uploaded_at);
                self.orders.insert(number.clone(), order.clone());
                Ok(OrderCreation::Created(order))
            }
        }
    }

    fn balance(&self, user_id: UserId) -> Balance {
        Balance::from_entries(self.entries.iter().filter(|e| e.user_id == user_id))
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError> {
        let mut state = self.write();
        if state.logins.contains_key(login) {
            return Err(StoreError::LoginTaken(login.to_string()));
        }

        let user = User {
            id: UserId::new(),
            login: login.to_string(),
            password_hash: password_hash.to_string(),
        };
        state.logins.insert(user.login.clone(), user.id);
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        let state = self.read();
        Ok(state
            .logins
            .get(login)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.read().users.get(&id).cloned())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_order(
        &self,
        number: &OrderNumber,
        user_id: UserId,
        uploaded_at: DateTime<Utc>,
    ) -> Result<OrderCreation, StoreError> {
        self.write().insert_order(number, user_id, uploaded_at)
    }

    async fn order(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        Ok(self.read().orders.get(number).cloned())
    }

    async fn transition(
        &self,
        number: &OrderNumber,
        from: OrderStatus,
        to: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<bool, StoreError> {
        check_transition(from, to, accrual)?;

        let mut state = self.write();
        let current = state
            .orders
            .get(number)
            .ok_or_else(|| StoreError::OrderNotFound(number.clone()))?;
        if current.status() != from {
            return Ok(false);
        }

        let updated = Order::restore(
            number.clone(),
            current.user_id(),
            to,
            accrual.unwrap_or(current.accrual()),
            current.uploaded_at(),
        );
        if to == OrderStatus::Processed && updated.accrual() > Decimal::ZERO {
            state.entries.push(LedgerEntry::credit(
                number.clone(),
                updated.user_id(),
                updated.accrual(),
                Utc::now(),
            ));
        }
        state.orders.insert(number.clone(), updated);
        Ok(true)
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .read()
            .orders
            .values()
            .filter(|o| o.is_owned_by(user_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            a.uploaded_at()
                .cmp(&b.uploaded_at())
                .then_with(|| a.number().cmp(b.number()))
        });
        Ok(orders)
    }

    async fn unfinished_orders(&self) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .read()
            .orders
            .values()
            .filter(|o| !o.status().is_terminal())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.uploaded_at());
        Ok(orders)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn balance(&self, user_id: UserId) -> Result<Balance, StoreError> {
        Ok(self.read().balance(user_id))
    }

    async fn withdraw(&self, withdrawal: &Withdrawal) -> Result<WithdrawalReceipt, StoreError> {
        let mut state = self.write();
        let now = Utc::now();

        withdrawal.check_funds(state.balance(withdrawal.user_id()).current)?;
        let anchor = state.insert_order(withdrawal.order_number(), withdrawal.user_id(), now)?;

        let entry = withdrawal.to_entry(now);
        state.entries.push(entry.clone());
        Ok(WithdrawalReceipt { entry, anchor })
    }

    async fn withdrawals(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut debits: Vec<LedgerEntry> = self
            .read()
            .entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id && e.is_withdrawal())
            .cloned()
            .collect();
        // Stable sort keeps reverse insertion order for equal timestamps.
        debits.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(debits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    use loyalty_ledger::WithdrawalError;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn number(raw: &str) -> OrderNumber {
        OrderNumber::parse(raw).unwrap()
    }

    /// Upload an order and drive it to `PROCESSED` with `accrual`.
    async fn credit(store: &InMemoryStore, raw: &str, user: UserId, accrual: &str) {
        let n = number(raw);
        store.create_order(&n, user, Utc::now()).await.unwrap();
        assert!(store.transition(&n, OrderStatus::New, OrderStatus::Processing, None).await.unwrap());
        assert!(
            store
                .transition(&n, OrderStatus::Processing, OrderStatus::Processed, Some(dec(accrual)))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn same_user_upload_is_idempotent() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        let n = number("125");

        let first = store.create_order(&n, user, Utc::now()).await.unwrap();
        let second = store.create_order(&n, user, Utc::now()).await.unwrap();

        assert!(matches!(first, OrderCreation::Created(_)));
        assert!(matches!(second, OrderCreation::AlreadyOwned(_)));
        assert_eq!(first.order(), second.order());
        assert_eq!(store.orders_for_user(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn other_user_upload_conflicts_and_keeps_owner() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let n = number("125");
        store.create_order(&n, owner, Utc::now()).await.unwrap();

        let err = store.create_order(&n, UserId::new(), Utc::now()).await.unwrap_err();

        assert!(matches!(err, StoreError::OrderOwnedByAnotherUser(ref x) if *x == n));
        assert_eq!(store.order(&n).await.unwrap().unwrap().user_id(), owner);
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() {
        let store = InMemoryStore::new();
        let n = number("125");
        store.create_order(&n, UserId::new(), Utc::now()).await.unwrap();

        assert!(store.transition(&n, OrderStatus::New, OrderStatus::Processing, None).await.unwrap());
        assert!(!store.transition(&n, OrderStatus::New, OrderStatus::Processing, None).await.unwrap());
        assert!(store.transition(&n, OrderStatus::Processing, OrderStatus::Invalid, None).await.unwrap());
        assert!(
            !store
                .transition(&n, OrderStatus::Processing, OrderStatus::Processed, Some(Decimal::ONE))
                .await
                .unwrap()
        );
        assert_eq!(store.order(&n).await.unwrap().unwrap().status(), OrderStatus::Invalid);
    }

    #[tokio::test]
    async fn backwards_transition_is_refused() {
        let store = InMemoryStore::new();
        let n = number("125");
        store.create_order(&n, UserId::new(), Utc::now()).await.unwrap();

        let err = store
            .transition(&n, OrderStatus::Processing, OrderStatus::New, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(_)));
    }

    #[tokio::test]
    async fn processed_order_credits_the_ledger_once() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        credit(&store, "125", user, "3.5").await;

        let balance = store.balance(user).await.unwrap();
        assert_eq!(balance.current, dec("3.5"));
        assert_eq!(balance.withdrawn, Decimal::ZERO);
        assert!(store.withdrawals(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn withdrawal_debits_and_anchors_order() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        credit(&store, "125", user, "1000").await;

        let withdrawal = Withdrawal::new(number("2377225624"), user, dec("751")).unwrap();
        let receipt = store.withdraw(&withdrawal).await.unwrap();

        assert_eq!(receipt.entry.amount, dec("-751"));
        assert!(matches!(receipt.anchor, OrderCreation::Created(_)));
        let balance = store.balance(user).await.unwrap();
        assert_eq!(balance.current, dec("249"));
        assert_eq!(balance.withdrawn, dec("751"));
        assert_eq!(store.withdrawals(user).await.unwrap(), vec![receipt.entry]);
    }

    #[tokio::test]
    async fn insufficient_funds_has_no_side_effect() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        credit(&store, "125", user, "10").await;

        let withdrawal = Withdrawal::new(number("2377225624"), user, dec("10.01")).unwrap();
        let err = store.withdraw(&withdrawal).await.unwrap_err();

        assert!(matches!(err, StoreError::Withdrawal(WithdrawalError::InsufficientFunds { .. })));
        assert!(store.order(&number("2377225624")).await.unwrap().is_none());
        assert_eq!(store.balance(user).await.unwrap().current, dec("10"));
    }

    #[tokio::test]
    async fn withdrawal_against_foreign_order_conflicts() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        credit(&store, "125", user, "100").await;
        store
            .create_order(&number("2377225624"), UserId::new(), Utc::now())
            .await
            .unwrap();

        let withdrawal = Withdrawal::new(number("2377225624"), user, dec("1")).unwrap();
        let err = store.withdraw(&withdrawal).await.unwrap_err();

        assert!(matches!(err, StoreError::OrderOwnedByAnotherUser(_)));
        assert!(store.withdrawals(user).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_withdrawals_never_overdraw() {
        let store = InMemoryStore::arc();
        let user = UserId::new();
        credit(&store, "125", user, "1000").await;

        let attempts: Vec<_> = (0..25)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    let withdrawal = Withdrawal::new(number("2377225624"), user, dec("100")).unwrap();
                    store.withdraw(&withdrawal).await.is_ok()
                })
            })
            .collect();

        let mut succeeded = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(store.balance(user).await.unwrap().current, Decimal::ZERO);
    }

    #[tokio::test]
    async fn logins_are_unique() {
        let store = InMemoryStore::new();
        let user = store.create_user("alice", "hash").await.unwrap();

        assert!(matches!(
            store.create_user("alice", "other").await,
            Err(StoreError::LoginTaken(_))
        ));
        assert_eq!(store.user_by_login("alice").await.unwrap(), Some(user.clone()));
        assert_eq!(store.user_by_id(user.id).await.unwrap(), Some(user));
        assert_eq!(store.user_by_login("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unfinished_orders_exclude_terminal_ones() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        credit(&store, "125", user, "1").await;
        store.create_order(&number("2377225624"), user, Utc::now()).await.unwrap();

        let unfinished = store.unfinished_orders().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].number().as_str(), "2377225624");
    }
}
