//! Order numbers: non-empty decimal digit strings with a valid Luhn checksum.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use loyalty_core::{DomainError, DomainResult, ValueObject};

/// A validated order number.
///
/// Kept as a string so leading zeros and arbitrary length survive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Validate `raw` and wrap it.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        if raw.is_empty() {
            return Err(DomainError::validation("order number is empty"));
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation(
                "order number must contain only decimal digits",
            ));
        }
        if !is_valid_luhn(raw) {
            return Err(DomainError::validation("order number fails the Luhn check"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for OrderNumber {}

impl core::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OrderNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderNumber> for String {
    fn from(value: OrderNumber) -> Self {
        value.0
    }
}

/// Luhn checksum over a string of ASCII digits.
///
/// Returns `false` for empty input or any non-digit byte.
pub fn is_valid_luhn(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    for (idx, byte) in number.bytes().rev().enumerate() {
        if !byte.is_ascii_digit() {
            return false;
        }
        let mut digit = u32::from(byte - b'0');
        if idx % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }

    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_luhn_vectors() {
        assert!(is_valid_luhn("4561261212345467"));
        assert!(!is_valid_luhn("4561261212345464"));
        assert!(is_valid_luhn("49927398716"));
        assert!(is_valid_luhn("1234567812345670"));
        assert!(!is_valid_luhn("1234567812345678"));
        assert!(is_valid_luhn("125"));
        assert!(is_valid_luhn("2377225624"));
    }

    #[test]
    fn parse_rejects_empty_and_non_digit_input() {
        assert!(OrderNumber::parse("").is_err());
        assert!(OrderNumber::parse("12 5").is_err());
        assert!(OrderNumber::parse("-125").is_err());
        assert!(OrderNumber::parse("１２５").is_err());
    }

    #[test]
    fn parse_keeps_leading_zeros() {
        let number = OrderNumber::parse("0125").unwrap();
        assert_eq!(number.as_str(), "0125");
    }

    #[test]
    fn conversion_from_string_validates() {
        let ok = OrderNumber::try_from("125".to_string()).unwrap();
        assert_eq!(String::from(ok), "125");
        assert!(OrderNumber::try_from("126".to_string()).is_err());
    }

    /// Append the digit that makes `prefix` Luhn-valid.
    fn with_check_digit(prefix: &[u8]) -> String {
        let mut digits: String = prefix.iter().map(|d| char::from(b'0' + d)).collect();
        for check in 0..10u8 {
            digits.push(char::from(b'0' + check));
            if is_valid_luhn(&digits) {
                return digits;
            }
            digits.pop();
        }
        unreachable!("one check digit always completes a Luhn number");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: changing exactly one digit of a valid number breaks the checksum.
        #[test]
        fn single_digit_mutation_is_detected(
            prefix in prop::collection::vec(0u8..10, 1..24),
            position in any::<prop::sample::Index>(),
            delta in 1u8..10,
        ) {
            let valid = with_check_digit(&prefix);
            prop_assert!(OrderNumber::parse(&valid).is_ok());

            let mut bytes = valid.into_bytes();
            let at = position.index(bytes.len());
            bytes[at] = b'0' + (bytes[at] - b'0' + delta) % 10;
            let mutated = String::from_utf8(bytes).unwrap();

            prop_assert!(!is_valid_luhn(&mutated));
        }
    }
}
