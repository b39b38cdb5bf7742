//! Accrual system client.
//!
//! The processor only reasons about [`AccrualOutcome`]s; HTTP status codes and
//! headers stay inside `client.rs`.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use loyalty_orders::OrderNumber;

pub mod client;

pub use client::HttpAccrualClient;

/// What the accrual system said about one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualOutcome {
    /// Calculation finished with this reward.
    Resolved(Decimal),
    /// The order will never earn a reward.
    Invalid,
    /// Registered or still being calculated.
    NotReady,
    /// Unknown to the accrual system (yet).
    NotFound,
    /// Rate limited or unavailable; `Some` when the server named a wait.
    Throttled(Option<Duration>),
}

#[derive(Debug, Error)]
pub enum AccrualError {
    /// Connection, timeout or body-read failure; worth retrying.
    #[error("accrual request failed: {0}")]
    Transport(String),

    /// A response the protocol does not allow; retrying will not help.
    #[error("unexpected accrual response: {0}")]
    Unexpected(String),
}

impl AccrualError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AccrualError::Transport(_))
    }
}

#[async_trait]
pub trait AccrualClient: Send + Sync {
    async fn get_accrual(&self, number: &OrderNumber) -> Result<AccrualOutcome, AccrualError>;
}
