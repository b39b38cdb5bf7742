//! Infrastructure layer: configuration, storage, the accrual client and the
//! order-processing job queue.

pub mod accrual;
pub mod config;
pub mod jobs;
pub mod storage;
