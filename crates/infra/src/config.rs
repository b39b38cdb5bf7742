//! Process configuration: command-line flags with environment fallbacks.

use std::time::Duration;

use clap::Parser;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    #[error("invalid accrual system address {address}: {reason}")]
    InvalidAccrualAddress { address: String, reason: String },
}

/// Runtime configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "loyalty-api", about = "Loyalty points accrual service")]
pub struct Config {
    /// Address the HTTP server listens on.
    #[arg(short = 'a', long, env = "RUN_ADDRESS", default_value = "localhost:8081")]
    pub run_address: String,

    /// Log level used when RUST_LOG is not set.
    #[arg(short = 'l', long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HMAC secret for session tokens.
    #[arg(short = 's', long, env = "JWT_SECRET_KEY", default_value = "secret", hide_env_values = true)]
    pub jwt_secret_key: String,

    /// Postgres connection string; in-memory stores when absent.
    #[arg(short = 'd', long, env = "DATABASE_URI")]
    pub database_uri: Option<String>,

    /// Base URL of the accrual system.
    #[arg(short = 'r', long, env = "ACCRUAL_SYSTEM_ADDRESS", default_value = "http://localhost:8083")]
    pub accrual_system_address: String,

    /// Number of concurrent order workers.
    #[arg(long, default_value_t = 3)]
    pub workers: usize,

    /// Delay before a transiently failed order is retried.
    #[arg(long, default_value_t = 10)]
    pub jobs_delay_secs: u64,

    /// Upper bound for one processing attempt.
    #[arg(long, default_value_t = 10)]
    pub job_timeout_secs: u64,

    /// Capacity of the in-process order queue.
    #[arg(long, default_value_t = 100)]
    pub queue_capacity: usize,

    /// Grace period for in-flight jobs on shutdown.
    #[arg(long, default_value_t = 20)]
    pub shutdown_timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NotPositive("workers"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::NotPositive("queue-capacity"));
        }
        if self.job_timeout_secs == 0 {
            return Err(ConfigError::NotPositive("job-timeout-secs"));
        }

        let url = reqwest::Url::parse(&self.accrual_system_address).map_err(|e| {
            ConfigError::InvalidAccrualAddress {
                address: self.accrual_system_address.clone(),
                reason: e.to_string(),
            }
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidAccrualAddress {
                address: self.accrual_system_address.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        Ok(())
    }

    pub fn jobs_delay(&self) -> Duration {
        Duration::from_secs(self.jobs_delay_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
