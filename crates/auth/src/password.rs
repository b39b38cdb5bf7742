//! bcrypt password hashing.

use crate::jwt::AuthError;

/// Hashes and verifies passwords with bcrypt.
///
/// Both operations are CPU-bound; async callers should run them on a blocking
/// thread.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl PasswordHasher {
    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }

    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        bcrypt::hash(password, self.cost).map_err(|e| AuthError::Hashing(e.to_string()))
    }

    /// `Ok(false)` on mismatch; `Err` only when `hash` is not a bcrypt hash.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        bcrypt::verify(password, hash).map_err(|e| AuthError::Hashing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_only_the_original_password() {
        let hasher = PasswordHasher::with_cost(4);
        let hash = hasher.hash("hunter22").unwrap();

        assert_ne!(hash, "hunter22");
        assert!(hasher.verify("hunter22", &hash).unwrap());
        assert!(!hasher.verify("hunter23", &hash).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(PasswordHasher::default().verify("hunter22", "plain").is_err());
    }
}
