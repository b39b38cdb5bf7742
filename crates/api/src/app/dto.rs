use serde::Deserialize;
use serde_json::{Value, json};

use loyalty_core::money::decimal_to_json;
use loyalty_ledger::{Balance, LedgerEntry};
use loyalty_orders::Order;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /api/user/balance/withdraw`.
///
/// `sum` stays a raw JSON number until it is turned into a decimal.
#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: serde_json::Number,
}

// -------------------------
// Response mapping
// -------------------------

pub fn order_to_json(order: &Order) -> Value {
    let mut body = json!({
        "number": order.number().as_str(),
        "status": order.status().as_str(),
        "uploaded_at": order.uploaded_at().to_rfc3339(),
    });
    if order.status().is_terminal() {
        body["accrual"] = decimal_to_json(order.accrual());
    }
    body
}

pub fn balance_to_json(balance: &Balance) -> Value {
    json!({
        "current": decimal_to_json(balance.current),
        "withdrawn": decimal_to_json(balance.withdrawn),
    })
}

pub fn withdrawal_to_json(entry: &LedgerEntry) -> Value {
    json!({
        "order": entry.order_number.as_str(),
        "sum": decimal_to_json(entry.withdrawn_sum()),
        "processed_at": entry.processed_at.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use loyalty_core::UserId;
    use loyalty_orders::OrderNumber;

    fn order() -> Order {
        Order::new(OrderNumber::parse("125").unwrap(), UserId::new(), Utc::now())
    }

    #[test]
    fn accrual_is_shown_only_once_final() {
        let mut order = order();
        assert!(order_to_json(&order).get("accrual").is_none());

        order.start_processing().unwrap();
        assert!(order_to_json(&order).get("accrual").is_none());

        order.resolve(Decimal::from_str("3.5").unwrap()).unwrap();
        let body = order_to_json(&order);
        assert_eq!(body["status"], "PROCESSED");
        assert_eq!(body["accrual"], json!(3.5));
    }

    #[test]
    fn invalid_orders_report_zero_accrual() {
        let mut order = order();
        order.start_processing().unwrap();
        order.reject().unwrap();
        assert_eq!(order_to_json(&order)["accrual"], json!(0));
    }

    #[test]
    fn withdrawals_are_listed_with_positive_sums() {
        let entry = LedgerEntry {
            order_number: OrderNumber::parse("2377225624").unwrap(),
            user_id: UserId::new(),
            amount: Decimal::from_str("-751").unwrap(),
            processed_at: Utc::now(),
        };
        let body = withdrawal_to_json(&entry);
        assert_eq!(body["order"], "2377225624");
        assert_eq!(body["sum"], json!(751));
    }

    #[test]
    fn withdraw_request_keeps_number_text() {
        let req: WithdrawRequest =
            serde_json::from_str(r#"{"order":"2377225624","sum":751.1}"#).unwrap();
        assert_eq!(req.sum.to_string(), "751.1");
    }
}
