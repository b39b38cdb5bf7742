use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use loyalty_core::{DomainError, DomainResult, Entity, UserId};

use crate::number::OrderNumber;

/// Order status lifecycle: `NEW -> PROCESSING -> {PROCESSED | INVALID}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    /// Whether moving from `self` to `next` is a forward step of the lifecycle.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::New, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Processed)
                | (OrderStatus::Processing, OrderStatus::Invalid)
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(DomainError::validation(format!("unknown order status: {other}"))),
        }
    }
}

/// An uploaded order.
///
/// Owned by the user who first uploaded it. The accrual stays zero until the
/// order enters `PROCESSED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    number: OrderNumber,
    user_id: UserId,
    status: OrderStatus,
    accrual: Decimal,
    uploaded_at: DateTime<Utc>,
}

impl Order {
    /// A freshly uploaded order (`NEW`, zero accrual).
    pub fn new(number: OrderNumber, user_id: UserId, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            number,
            user_id,
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
            uploaded_at,
        }
    }

    /// Rebuild an order from persisted state.
    pub fn restore(
        number: OrderNumber,
        user_id: UserId,
        status: OrderStatus,
        accrual: Decimal,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            number,
            user_id,
            status,
            accrual,
            uploaded_at,
        }
    }

    pub fn number(&self) -> &OrderNumber {
        &self.number
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn accrual(&self) -> Decimal {
        self.accrual
    }

    pub fn uploaded_at(&self) -> DateTime<Utc> {
        self.uploaded_at
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// `NEW -> PROCESSING`.
    pub fn start_processing(&mut self) -> DomainResult<()> {
        self.advance(OrderStatus::Processing)
    }

    /// `PROCESSING -> PROCESSED`, recording the accrual.
    pub fn resolve(&mut self, accrual: Decimal) -> DomainResult<()> {
        if accrual < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "accrual must not be negative, got {accrual}"
            )));
        }
        self.advance(OrderStatus::Processed)?;
        self.accrual = accrual;
        Ok(())
    }

    /// `PROCESSING -> INVALID`.
    pub fn reject(&mut self) -> DomainResult<()> {
        self.advance(OrderStatus::Invalid)
    }

    fn advance(&mut self, next: OrderStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "order {} cannot move from {} to {}",
                self.number, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

impl Entity for Order {
    type Id = OrderNumber;

    fn id(&self) -> &Self::Id {
        &self.number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;

    fn new_order() -> Order {
        Order::new(OrderNumber::parse("125").unwrap(), UserId::new(), Utc::now())
    }

    #[test]
    fn new_order_starts_unresolved() {
        let order = new_order();
        assert_eq!(order.status(), OrderStatus::New);
        assert!(order.accrual().is_zero());
    }

    #[test]
    fn happy_path_sets_accrual_once() {
        let mut order = new_order();
        order.start_processing().unwrap();
        order.resolve(Decimal::from_str("3.5").unwrap()).unwrap();

        assert_eq!(order.status(), OrderStatus::Processed);
        assert_eq!(order.accrual(), Decimal::from_str("3.5").unwrap());
        assert!(order.resolve(Decimal::ONE).is_err());
    }

    #[test]
    fn status_never_moves_backwards() {
        let mut order = new_order();
        assert!(order.resolve(Decimal::ONE).is_err());
        assert!(order.reject().is_err());

        order.start_processing().unwrap();
        order.reject().unwrap();
        assert_eq!(order.status(), OrderStatus::Invalid);
        assert!(order.start_processing().is_err());
    }

    #[test]
    fn negative_accrual_is_rejected() {
        let mut order = new_order();
        order.start_processing().unwrap();
        assert!(order.resolve(Decimal::NEGATIVE_ONE).is_err());
        assert_eq!(order.status(), OrderStatus::Processing);
    }

    #[test]
    fn transition_table() {
        use OrderStatus::*;
        let all = [New, Processing, Invalid, Processed];
        let allowed = [(New, Processing), (Processing, Processed), (Processing, Invalid)];

        for from in all {
            for to in all {
                assert_eq!(from.can_transition_to(to), allowed.contains(&(from, to)), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn status_text_round_trips() {
        for status in [OrderStatus::New, OrderStatus::Processing, OrderStatus::Invalid, OrderStatus::Processed] {
            assert_eq!(OrderStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(OrderStatus::from_str("REGISTERED").is_err());
    }
}
