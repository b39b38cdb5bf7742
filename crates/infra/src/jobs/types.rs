//! Core job types.

use std::time::Duration;

use thiserror::Error;

use crate::config::Config;

/// What a worker should do with a job after one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// The order reached a state that needs no further work.
    Success,
    /// Transient failure: requeue after the queue's `jobs_delay` without
    /// holding the worker.
    RetryAfterDelay,
    /// Upstream asked us to back off: this worker sleeps, then requeues.
    PauseWorkerFor(Duration),
    /// Not retryable; the job is dropped.
    Fatal(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("order queue is closed")]
    Closed,

    #[error("cancelled while waiting for queue capacity")]
    Cancelled,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Name for logging
    pub name: String,
    /// Maximum number of buffered jobs
    pub capacity: usize,
    /// Delay before a `RetryAfterDelay` job is requeued
    pub jobs_delay: Duration,
    /// Upper bound for one processing attempt
    pub job_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "accrual-queue".to_string(),
            capacity: 100,
            jobs_delay: Duration::from_secs(10),
            job_timeout: Duration::from_secs(10),
        }
    }
}

impl QueueConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_jobs_delay(mut self, delay: Duration) -> Self {
        self.jobs_delay = delay;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

impl From<&Config> for QueueConfig {
    fn from(config: &Config) -> Self {
        Self::default()
            .with_capacity(config.queue_capacity)
            .with_jobs_delay(config.jobs_delay())
            .with_job_timeout(config.job_timeout())
    }
}

/// Runtime counters of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub workers_paused: u64,
    pub jobs_failed: u64,
    pub jobs_timed_out: u64,
}
