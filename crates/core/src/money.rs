//! Money helpers.
//!
//! Amounts are `rust_decimal::Decimal` end to end. JSON numbers are converted
//! through their textual form so `751.1` never becomes `751.0999999...`.

use core::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Number, Value};

use crate::error::{DomainError, DomainResult};

/// Maximum number of fractional digits a user-supplied amount may carry.
pub const CURRENCY_SCALE: u32 = 2;

/// `true` when `amount` has no more than [`CURRENCY_SCALE`] significant
/// fractional digits (`1.10` passes, `1.101` does not).
pub fn fits_currency_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= CURRENCY_SCALE
}

/// Parse a JSON number into an exact decimal.
pub fn decimal_from_json(number: &Number) -> DomainResult<Decimal> {
    let raw = number.to_string();
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|e| DomainError::validation(format!("invalid amount {raw}: {e}")))
}

/// Render a decimal as a JSON number (`3.5`, `249`).
///
/// Fractional amounts go through `f64`, whose shortest form reproduces any
/// decimal of up to 15 significant digits, so every amount below 10^13 at
/// [`CURRENCY_SCALE`] renders exactly. Longer values are rounded to the
/// nearest `f64`.
pub fn decimal_to_json(amount: Decimal) -> Value {
    let amount = amount.normalize();
    if amount.scale() == 0 {
        if let Some(whole) = amount.to_i64() {
            return Value::Number(whole.into());
        }
    }
    amount
        .to_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
