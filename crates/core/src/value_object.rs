//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Implementors are immutable and compared by their attribute values, e.g. an
/// order number: two `OrderNumber`s holding the same digits are the same number.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
