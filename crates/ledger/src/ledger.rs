use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use loyalty_core::UserId;
use loyalty_core::money::fits_currency_scale;
use loyalty_orders::OrderNumber;

/// One signed balance movement.
///
/// Positive amounts are accrual credits, negative amounts are withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub order_number: OrderNumber,
    pub user_id: UserId,
    pub amount: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Accrual credit for a processed order.
    pub fn credit(
        order_number: OrderNumber,
        user_id: UserId,
        amount: Decimal,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_number,
            user_id,
            amount,
            processed_at,
        }
    }

    pub fn is_withdrawal(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Absolute value of a withdrawal (the `sum` users see).
    pub fn withdrawn_sum(&self) -> Decimal {
        self.amount.abs()
    }
}

/// Derived balance of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Sum of all entries.
    pub current: Decimal,
    /// Sum of the absolute values of all withdrawals.
    pub withdrawn: Decimal,
}

impl Balance {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let mut balance = Self::default();
        for entry in entries {
            balance.apply(entry.amount);
        }
        balance
    }

    pub fn apply(&mut self, amount: Decimal) {
        self.current += amount;
        if amount < Decimal::ZERO {
            self.withdrawn += amount.abs();
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WithdrawalError {
    #[error("withdrawal sum must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("withdrawal sum {0} has more than two fractional digits")]
    TooPrecise(Decimal),

    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },
}

/// A validated withdrawal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    order_number: OrderNumber,
    user_id: UserId,
    amount: Decimal,
}

impl Withdrawal {
    /// Validate the amount: positive, at most two fractional digits.
    pub fn new(
        order_number: OrderNumber,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<Self, WithdrawalError> {
        if amount <= Decimal::ZERO {
            return Err(WithdrawalError::NonPositiveAmount(amount));
        }
        if !fits_currency_scale(amount) {
            return Err(WithdrawalError::TooPrecise(amount));
        }
        Ok(Self {
            order_number,
            user_id,
            amount,
        })
    }

    pub fn order_number(&self) -> &OrderNumber {
        &self.order_number
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Must be evaluated against a balance read under the user's withdrawal lock.
    pub fn check_funds(&self, current: Decimal) -> Result<(), WithdrawalError> {
        if current < self.amount {
            return Err(WithdrawalError::InsufficientFunds {
                requested: self.amount,
                available: current,
            });
        }
        Ok(())
    }

    /// The debit entry recording this withdrawal.
    pub fn to_entry(&self, processed_at: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            order_number: self.order_number.clone(),
            user_id: self.user_id,
            amount: -self.amount,
            processed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;
    use proptest::prelude::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn order(raw: &str) -> OrderNumber {
        OrderNumber::parse(raw).unwrap()
    }

    #[test]
    fn balance_aggregates_signed_entries() {
        let user = UserId::new();
        let now = Utc::now();
        let entries = vec![
            LedgerEntry::credit(order("125"), user, dec("1000"), now),
            Withdrawal::new(order("2377225624"), user, dec("751"))
                .unwrap()
                .to_entry(now),
        ];

        let balance = Balance::from_entries(&entries);
        assert_eq!(balance.current, dec("249"));
        assert_eq!(balance.withdrawn, dec("751"));
        assert!(entries[1].is_withdrawal());
        assert_eq!(entries[1].withdrawn_sum(), dec("751"));
    }

    #[test]
    fn withdrawal_amount_validation() {
        let user = UserId::new();
        assert_eq!(
            Withdrawal::new(order("125"), user, Decimal::ZERO),
            Err(WithdrawalError::NonPositiveAmount(Decimal::ZERO))
        );
        assert!(matches!(
            Withdrawal::new(order("125"), user, dec("-5")),
            Err(WithdrawalError::NonPositiveAmount(_))
        ));
        assert_eq!(
            Withdrawal::new(order("125"), user, dec("1.005")),
            Err(WithdrawalError::TooPrecise(dec("1.005")))
        );
        assert!(Withdrawal::new(order("125"), user, dec("1.50")).is_ok());
    }

    #[test]
    fn insufficient_funds_reports_both_sides() {
        let withdrawal = Withdrawal::new(order("125"), UserId::new(), dec("751")).unwrap();
        assert_eq!(
            withdrawal.check_funds(dec("750.99")),
            Err(WithdrawalError::InsufficientFunds {
                requested: dec("751"),
                available: dec("750.99"),
            })
        );
        assert!(withdrawal.check_funds(dec("751")).is_ok());
    }

    #[derive(Debug, Clone)]
    enum Movement {
        Credit(i64),
        Withdraw(i64),
    }

    fn movement() -> impl Strategy<Value = Movement> {
        prop_oneof![
            (0i64..100_000).prop_map(Movement::Credit),
            (1i64..100_000).prop_map(Movement::Withdraw),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: applying only withdrawals that pass `check_funds` keeps the
        /// balance non-negative, and `current` always equals credits minus
        /// `withdrawn`.
        #[test]
        fn checked_withdrawals_never_overdraw(
            movements in prop::collection::vec(movement(), 1..64)
        ) {
            let user = UserId::new();
            let now = Utc::now();
            let mut entries = Vec::new();
            let mut credited = Decimal::ZERO;

            for m in movements {
                let current = Balance::from_entries(&entries).current;
                match m {
                    Movement::Credit(cents) => {
                        let amount = Decimal::new(cents, 2);
                        credited += amount;
                        entries.push(LedgerEntry::credit(order("125"), user, amount, now));
                    }
                    Movement::Withdraw(cents) => {
                        let withdrawal = Withdrawal::new(order("2377225624"), user, Decimal::new(cents, 2)).unwrap();
                        if withdrawal.check_funds(current).is_ok() {
                            entries.push(withdrawal.to_entry(now));
                        }
                    }
                }

                let balance = Balance::from_entries(&entries);
                prop_assert!(balance.current >= Decimal::ZERO);
                prop_assert_eq!(balance.current, credited - balance.withdrawn);
            }
        }
    }
}
