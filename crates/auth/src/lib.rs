//! `loyalty-auth`: authentication boundary.
//!
//! Credentials policy, password hashing and HS256 tokens. Decoupled from HTTP
//! and storage.

pub mod claims;
pub mod credentials;
pub mod jwt;
pub mod password;
pub mod user;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use credentials::{Credentials, InvalidField};
pub use jwt::{AuthError, Hs256Jwt, JwtValidator};
pub use password::PasswordHasher;
pub use user::User;
