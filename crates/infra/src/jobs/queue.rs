//! Bounded order queue and its worker pool.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, error, info, warn};

use loyalty_orders::{Order, OrderNumber};

use super::processor::OrderProcessor;
use super::shutdown::ShutdownSignal;
use super::types::{JobResult, QueueConfig, QueueError, QueueStats};

/// Result of an external enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// The number is already queued, in flight or waiting for a retry.
    AlreadyTracked,
}

/// In-process queue of orders awaiting an accrual step.
///
/// Every order number is tracked from its external enqueue until it succeeds,
/// fails fatally or is dropped on shutdown, so at most one job per order
/// exists at a time. Retries and pauses requeue without releasing it.
#[derive(Debug)]
pub struct OrderQueue {
    config: QueueConfig,
    tx: Mutex<Option<mpsc::Sender<Order>>>,
    rx: AsyncMutex<mpsc::Receiver<Order>>,
    tracked: Mutex<HashSet<OrderNumber>>,
    counters: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    paused: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl OrderQueue {
    pub fn new(config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        Self {
            config,
            tx: Mutex::new(Some(tx)),
            rx: AsyncMutex::new(rx),
            tracked: Mutex::new(HashSet::new()),
            counters: Counters::default(),
        }
    }

    pub fn arc(config: QueueConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    /// Queue `order` unless its number is already tracked.
    ///
    /// Waits while the buffer is full; gives up with
    /// [`QueueError::Cancelled`] if `cancel` fires first.
    pub async fn enqueue(
        &self,
        order: Order,
        cancel: &ShutdownSignal,
    ) -> Result<Enqueued, QueueError> {
        let number = order.number().clone();
        if !self.tracking().insert(number.clone()) {
            debug!(queue = %self.config.name, order_number = %number, "order already tracked");
            return Ok(Enqueued::AlreadyTracked);
        }

        match self.send(order, cancel).await {
            Ok(()) => Ok(Enqueued::Queued),
            Err(e) => {
                self.release(&number);
                Err(e)
            }
        }
    }

    /// Close the queue for new entries; buffered jobs can still be received.
    pub fn stop(&self) {
        if self.sender_slot().take().is_some() {
            info!(queue = %self.config.name, "order queue closed");
        }
    }

    pub fn is_tracked(&self, number: &OrderNumber) -> bool {
        self.tracking().contains(number)
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.counters;
        QueueStats {
            jobs_processed: c.processed.load(Ordering::Relaxed),
            jobs_succeeded: c.succeeded.load(Ordering::Relaxed),
            jobs_retried: c.retried.load(Ordering::Relaxed),
            workers_paused: c.paused.load(Ordering::Relaxed),
            jobs_failed: c.failed.load(Ordering::Relaxed),
            jobs_timed_out: c.timed_out.load(Ordering::Relaxed),
        }
    }

    /// Start `count` workers pulling from this queue.
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        processor: Arc<dyn OrderProcessor>,
        shutdown: ShutdownSignal,
    ) -> WorkerPool {
        let handles = (0..count)
            .map(|worker| {
                let queue = Arc::clone(self);
                let processor = Arc::clone(&processor);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { queue.run_worker(worker, processor, shutdown).await })
            })
            .collect();

        WorkerPool {
            queue: Arc::clone(self),
            handles,
        }
    }

    fn tracking(&self) -> MutexGuard<'_, HashSet<OrderNumber>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sender_slot(&self) -> MutexGuard<'_, Option<mpsc::Sender<Order>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, number: &OrderNumber) {
        self.tracking().remove(number);
    }

    async fn send(&self, order: Order, cancel: &ShutdownSignal) -> Result<(), QueueError> {
        let tx = self.sender_slot().clone().ok_or(QueueError::Closed)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
            sent = tx.send(order) => sent.map_err(|_| QueueError::Closed),
        }
    }

    async fn next_job(&self) -> Option<Order> {
        self.rx.lock().await.recv().await
    }

    async fn run_worker(
        self: Arc<Self>,
        worker: usize,
        processor: Arc<dyn OrderProcessor>,
        shutdown: ShutdownSignal,
    ) {
        info!(queue = %self.config.name, worker, job_name = processor.name(), "order worker started");

        loop {
            let order = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.next_job() => match next {
                    Some(order) => order,
                    None => break,
                },
            };
            self.handle(worker, processor.as_ref(), order, &shutdown).await;
        }

        info!(queue = %self.config.name, worker, "order worker stopped");
    }

    async fn handle(
        self: &Arc<Self>,
        worker: usize,
        processor: &dyn OrderProcessor,
        mut order: Order,
        shutdown: &ShutdownSignal,
    ) {
        let number = order.number().clone();

        loop {
            bump(&self.counters.processed);

            let result =
                match timeout(self.config.job_timeout, processor.process(order.clone())).await {
                    Ok(result) => result,
                    Err(_) => {
                        bump(&self.counters.timed_out);
                        warn!(
                            worker,
                            order_number = %number,
                            timeout = ?self.config.job_timeout,
                            "order job timed out"
                        );
                        JobResult::RetryAfterDelay
                    }
                };

            match result {
                JobResult::Success => {
                    bump(&self.counters.succeeded);
                    debug!(worker, order_number = %number, "order job finished");
                    self.release(&number);
                }
                JobResult::RetryAfterDelay => {
                    bump(&self.counters.retried);
                    let delay = self.config.jobs_delay;
                    info!(worker, order_number = %number, delay = ?delay, "retrying order job later");

                    let queue = Arc::clone(self);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move { queue.requeue_after(order, delay, &shutdown).await });
                }
                JobResult::PauseWorkerFor(pause) => {
                    bump(&self.counters.paused);
                    warn!(worker, order_number = %number, retry_after = ?pause, "pausing worker");
                    if let Some(held) = self.resume_after_pause(order, pause, shutdown).await {
                        debug!(worker, order_number = %number, "queue full after pause, keeping job");
                        order = held;
                        continue;
                    }
                }
                JobResult::Fatal(reason) => {
                    bump(&self.counters.failed);
                    error!(
                        worker,
                        order_number = %number,
                        job_name = processor.name(),
                        error = %reason,
                        "order job failed"
                    );
                    self.release(&number);
                }
            }
            return;
        }
    }

    /// Sleep out a pause, then hand `order` back to the queue.
    ///
    /// Never waits for capacity: the caller is a worker, and a full buffer
    /// is only drained by workers. Returns the order when the buffer is full
    /// so the worker runs it again itself.
    async fn resume_after_pause(
        &self,
        order: Order,
        pause: Duration,
        shutdown: &ShutdownSignal,
    ) -> Option<Order> {
        let number = order.number().clone();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(order_number = %number, "dropping paused job on shutdown");
                self.release(&number);
                return None;
            }
            _ = sleep(pause) => {}
        }

        let Some(tx) = self.sender_slot().clone() else {
            self.release(&number);
            return None;
        };
        match tx.try_send(order) {
            Ok(()) => None,
            Err(TrySendError::Full(order)) => Some(order),
            Err(TrySendError::Closed(_)) => {
                warn!(order_number = %number, "queue closed while worker was paused");
                self.release(&number);
                None
            }
        }
    }

    /// Sleep `delay`, then put `order` back, keeping it tracked.
    async fn requeue_after(&self, order: Order, delay: Duration, shutdown: &ShutdownSignal) {
        let number = order.number().clone();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(order_number = %number, "dropping pending retry on shutdown");
                self.release(&number);
            }
            _ = sleep(delay) => {
                if let Err(e) = self.send(order, shutdown).await {
                    warn!(order_number = %number, error = %e, "failed to requeue order job");
                    self.release(&number);
                }
            }
        }
    }
}

/// Join handles of running workers.
#[derive(Debug)]
pub struct WorkerPool {
    queue: Arc<OrderQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for workers to stop after shutdown was triggered.
    ///
    /// Workers still busy when `grace` runs out are aborted; their orders
    /// keep the last persisted status. Returns how many were aborted.
    pub async fn join(self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        let name = &self.queue.config.name;
        let mut abandoned = 0;

        for mut handle in self.handles {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(queue = %name, error = %e, "order worker crashed"),
                Err(_) => {
                    handle.abort();
                    abandoned += 1;
                }
            }
        }

        if abandoned > 0 {
            warn!(queue = %name, abandoned, "aborted workers after shutdown grace period");
        } else {
            info!(queue = %name, "all order workers stopped");
        }

        let stats = self.queue.stats();
        info!(
            queue = %name,
            processed = stats.jobs_processed,
            succeeded = stats.jobs_succeeded,
            retried = stats.jobs_retried,
            paused = stats.workers_paused,
            failed = stats.jobs_failed,
            timed_out = stats.jobs_timed_out,
            "order queue totals"
        );
        abandoned
    }
}
