//! Login/password policy.

use serde::{Deserialize, Serialize};

const LOGIN_LEN: core::ops::RangeInclusive<usize> = 3..=30;
const PASSWORD_LEN: core::ops::RangeInclusive<usize> = 6..=50;

/// Registration/login request body.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// One failed field check, reported back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidField {
    pub field: &'static str,
    pub message: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    /// Every violated rule, or `Ok` when both fields pass.
    pub fn validate(&self) -> Result<(), Vec<InvalidField>> {
        let mut errors = Vec::new();
        check_field("login", &self.login, LOGIN_LEN, &mut errors);
        check_field("password", &self.password, PASSWORD_LEN, &mut errors);
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn check_field(
    field: &'static str,
    value: &str,
    len: core::ops::RangeInclusive<usize>,
    errors: &mut Vec<InvalidField>,
) {
    if !len.contains(&value.chars().count()) {
        errors.push(InvalidField {
            field,
            message: format!(
                "{field} must be between {} and {} characters long",
                len.start(),
                len.end()
            ),
        });
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        errors.push(InvalidField {
            field,
            message: format!("{field} must contain only latin letters and digits"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_credentials_pass() {
        assert!(Credentials::new("alice", "secret1").validate().is_ok());
        assert!(Credentials::new("abc", "abcdef").validate().is_ok());
    }

    #[test]
    fn every_failure_is_reported() {
        let errors = Credentials::new("a!", "short").validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["login", "login", "password"]);
    }

    #[test]
    fn length_limits_are_inclusive() {
        assert!(Credentials::new("a".repeat(30), "p".repeat(50)).validate().is_ok());
        assert!(Credentials::new("a".repeat(31), "secret1").validate().is_err());
        assert!(Credentials::new("alice", "p".repeat(51)).validate().is_err());
    }

    #[test]
    fn debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("alice", "secret1"));
        assert!(!rendered.contains("secret1"));
    }
}
