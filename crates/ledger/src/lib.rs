//! Balance ledger domain module.
//!
//! Signed, append-only ledger entries per user and the rules that keep a
//! balance from going negative. Storage lives in `loyalty-infra`.

pub mod ledger;

pub use ledger::{Balance, LedgerEntry, Withdrawal, WithdrawalError};
