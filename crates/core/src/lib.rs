//! `loyalty-core`: domain foundation shared by every other crate.
//!
//! Pure types only: identifiers, the domain error model and money helpers.

pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::UserId;
pub use value_object::ValueObject;
