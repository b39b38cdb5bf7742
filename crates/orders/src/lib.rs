//! Orders domain module.
//!
//! Order numbers, the order status machine and the `Order` entity. Pure domain
//! logic (no IO, no HTTP, no storage).

pub mod number;
pub mod order;

pub use number::{OrderNumber, is_valid_luhn};
pub use order::{Order, OrderStatus};
