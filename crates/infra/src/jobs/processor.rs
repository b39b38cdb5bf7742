//! One step of the order lifecycle against the accrual system.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use loyalty_orders::{Order, OrderStatus};

use super::types::JobResult;
use crate::accrual::{AccrualClient, AccrualOutcome};
use crate::storage::OrderStore;

/// Work a queue worker performs for one dequeued order.
#[async_trait]
pub trait OrderProcessor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn process(&self, order: Order) -> JobResult;
}

/// Drives an order from `NEW` to a terminal status using the accrual system.
///
/// Status is always re-read from the store; the dequeued copy only names the
/// order. Every persisted step is a compare-and-set, so a concurrent attempt
/// that already moved the order on is reported as success.
pub struct AccrualProcessor {
    orders: Arc<dyn OrderStore>,
    client: Arc<dyn AccrualClient>,
}

impl AccrualProcessor {
    pub fn new(orders: Arc<dyn OrderStore>, client: Arc<dyn AccrualClient>) -> Self {
        Self { orders, client }
    }

    async fn current(&self, order: &Order) -> Result<Order, JobResult> {
        match self.orders.order(order.number()).await {
            Ok(Some(stored)) => Ok(stored),
            Ok(None) => Err(JobResult::Fatal(format!("order {} not found", order.number()))),
            Err(e) => Err(JobResult::Fatal(e.to_string())),
        }
    }

    /// Persist `NEW -> PROCESSING` and return the order as it now stands.
    async fn claim(&self, order: Order) -> Result<Order, JobResult> {
        let applied = self
            .orders
            .transition(order.number(), OrderStatus::New, OrderStatus::Processing, None)
            .await
            .map_err(|e| JobResult::Fatal(e.to_string()))?;

        if applied {
            let mut claimed = order;
            claimed
                .start_processing()
                .map_err(|e| JobResult::Fatal(e.to_string()))?;
            Ok(claimed)
        } else {
            self.current(&order).await
        }
    }

    async fn finish(&self, mut order: Order, outcome: AccrualOutcome) -> JobResult {
        let applied = match outcome {
            AccrualOutcome::Resolved(accrual) => order.resolve(accrual),
            AccrualOutcome::Invalid => order.reject(),
            AccrualOutcome::NotReady | AccrualOutcome::NotFound => {
                debug!(order_number = %order.number(), ?outcome, "accrual not ready yet");
                return JobResult::RetryAfterDelay;
            }
            AccrualOutcome::Throttled(Some(retry_after)) => {
                return JobResult::PauseWorkerFor(retry_after);
            }
            AccrualOutcome::Throttled(None) => return JobResult::RetryAfterDelay,
        };
        if let Err(e) = applied {
            return JobResult::Fatal(e.to_string());
        }

        let accrual = (order.status() == OrderStatus::Processed).then(|| order.accrual());
        match self
            .orders
            .transition(order.number(), OrderStatus::Processing, order.status(), accrual)
            .await
        {
            Ok(true) => {
                info!(
                    order_number = %order.number(),
                    status = %order.status(),
                    accrual = %order.accrual(),
                    "order resolved"
                );
                JobResult::Success
            }
            Ok(false) => {
                debug!(order_number = %order.number(), "order already resolved elsewhere");
                JobResult::Success
            }
            Err(e) => JobResult::Fatal(e.to_string()),
        }
    }
}

#[async_trait]
impl OrderProcessor for AccrualProcessor {
    fn name(&self) -> &str {
        "accrual"
    }

    async fn process(&self, order: Order) -> JobResult {
        let order = match self.current(&order).await {
            Ok(order) => order,
            Err(result) => return result,
        };

        let order = match order.status() {
            OrderStatus::New => match self.claim(order).await {
                Ok(order) => order,
                Err(result) => return result,
            },
            _ => order,
        };

        match order.status() {
            OrderStatus::Processing => {}
            status if status.is_terminal() => {
                debug!(order_number = %order.number(), %status, "order already final");
                return JobResult::Success;
            }
            status => {
                return JobResult::Fatal(format!(
                    "order {} is {status}, expected {}",
                    order.number(),
                    OrderStatus::Processing
                ));
            }
        }

        match self.client.get_accrual(order.number()).await {
            Ok(outcome) => self.finish(order, outcome).await,
            Err(e) if e.is_transient() => {
                warn!(order_number = %order.number(), error = %e, "accrual request failed");
                JobResult::RetryAfterDelay
            }
            Err(e) => JobResult::Fatal(e.to_string()),
        }
    }
}
