//! Startup sweep for orders left unfinished by a previous run.

use tracing::{info, warn};

use super::queue::{Enqueued, OrderQueue};
use super::shutdown::ShutdownSignal;
use crate::storage::{OrderStore, StoreError};

/// Enqueue every `NEW` or `PROCESSING` order, oldest upload first.
///
/// Each enqueue waits for queue capacity, so this should run as its own task
/// once workers are draining. Stops early when the queue closes or shutdown
/// fires. Returns how many orders were queued.
pub async fn requeue_unfinished(
    orders: &dyn OrderStore,
    queue: &OrderQueue,
    cancel: &ShutdownSignal,
) -> Result<usize, StoreError> {
    let pending = orders.unfinished_orders().await?;
    let total = pending.len();
    let mut queued = 0;

    for order in pending {
        let number = order.number().clone();
        match queue.enqueue(order, cancel).await {
            Ok(Enqueued::Queued) => queued += 1,
            Ok(Enqueued::AlreadyTracked) => {}
            Err(e) => {
                warn!(order_number = %number, error = %e, queued, total, "reconciliation sweep interrupted");
                return Ok(queued);
            }
        }
    }

    info!(queued, total, "requeued unfinished orders");
    Ok(queued)
}
