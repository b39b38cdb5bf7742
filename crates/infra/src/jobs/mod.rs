//! Order-processing pipeline: a bounded in-process queue drained by a pool of
//! workers.
//!
//! - `types.rs`: job outcomes, queue configuration and statistics
//! - `shutdown.rs`: process-wide cancellation signal
//! - `queue.rs`: the queue, its single-flight bookkeeping and the worker loop
//! - `processor.rs`: one step of the order state machine against the accrual system
//! - `reconcile.rs`: startup sweep re-enqueueing unfinished orders

pub mod processor;
pub mod queue;
pub mod reconcile;
pub mod shutdown;
pub mod types;

pub use processor::{AccrualProcessor, OrderProcessor};
pub use queue::{Enqueued, OrderQueue, WorkerPool};
pub use reconcile::requeue_unfinished;
pub use shutdown::{Shutdown, ShutdownSignal};
pub use types::{JobResult, QueueConfig, QueueError, QueueStats};
