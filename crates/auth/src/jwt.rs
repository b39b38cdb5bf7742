//! HS256 session tokens.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use loyalty_core::UserId;

use crate::claims::{JwtClaims, TokenValidationError, validate_claims};

/// Default session lifetime.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error(transparent)]
    Claims(#[from] TokenValidationError),

    #[error("failed to sign token: {0}")]
    Signing(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// Verifies a bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, AuthError>;
}

/// Symmetric HS256 issuer and validator sharing one secret.
#[derive(Clone)]
pub struct Hs256Jwt {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl Hs256Jwt {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();

        // Time checks run in `validate_claims` against the caller's clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl: Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sign a token for `user_id` valid from `now` for the configured ttl.
    pub fn issue(&self, user_id: UserId, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = JwtClaims {
            sub: user_id,
            issued_at: now,
            expires_at: now + self.ttl,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

impl JwtValidator for Hs256Jwt {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, AuthError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

impl core::fmt::Debug for Hs256Jwt {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256Jwt").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_validates_to_same_subject() {
        let jwt = Hs256Jwt::new("secret");
        let user = UserId::new();
        let now = Utc::now();

        let token = jwt.issue(user, now).unwrap();
        let claims = jwt.validate(&token, now + Duration::hours(1)).unwrap();

        assert_eq!(claims.sub, user);
        assert_eq!(claims.expires_at, now + Duration::hours(DEFAULT_TOKEN_TTL_HOURS));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let now = Utc::now();
        let token = Hs256Jwt::new("one").issue(UserId::new(), now).unwrap();

        let err = Hs256Jwt::new("two").validate(&token, now).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = Hs256Jwt::new("secret").with_ttl(Duration::minutes(1));
        let now = Utc::now();
        let token = jwt.issue(UserId::new(), now).unwrap();

        let err = jwt.validate(&token, now + Duration::minutes(2)).unwrap_err();
        assert!(matches!(err, AuthError::Claims(TokenValidationError::Expired)));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = Hs256Jwt::new("secret").validate("not.a.jwt", Utc::now()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }
}
