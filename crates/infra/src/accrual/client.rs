use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use loyalty_core::money::decimal_from_json;
use loyalty_orders::OrderNumber;

use super::{AccrualClient, AccrualError, AccrualOutcome};

#[derive(Debug, Deserialize)]
struct AccrualResponse {
    order: String,
    status: String,
    #[serde(default)]
    accrual: Option<serde_json::Number>,
}

/// reqwest-based client for `GET {base}/api/orders/{number}`.
#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAccrualClient {
    /// `timeout` bounds each request end to end.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AccrualError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccrualError::Unexpected(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn order_url(&self, number: &OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn get_accrual(&self, number: &OrderNumber) -> Result<AccrualOutcome, AccrualError> {
        debug!(order_number = %number, "requesting accrual");

        let response = self
            .client
            .get(self.order_url(number))
            .send()
            .await
            .map_err(|e| AccrualError::Transport(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| AccrualError::Transport(e.to_string()))?;
                let parsed: AccrualResponse = serde_json::from_slice(&body)
                    .map_err(|e| AccrualError::Unexpected(format!("malformed body: {e}")))?;
                if parsed.order != number.as_str() {
                    warn!(order_number = %number, reported = %parsed.order, "accrual response names another order");
                }
                outcome_from_body(parsed)
            }
            StatusCode::NO_CONTENT => Ok(AccrualOutcome::NotFound),
            s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
                let retry_after = parse_retry_after(response.headers());
                warn!(
                    order_number = %number,
                    status_code = s.as_u16(),
                    retry_after = ?retry_after,
                    "accrual system throttled the request"
                );
                Ok(AccrualOutcome::Throttled(retry_after))
            }
            other => Err(AccrualError::Unexpected(format!(
                "unexpected status code {}",
                other.as_u16()
            ))),
        }
    }
}

fn outcome_from_body(body: AccrualResponse) -> Result<AccrualOutcome, AccrualError> {
    match body.status.as_str() {
        "REGISTERED" | "PROCESSING" => Ok(AccrualOutcome::NotReady),
        "INVALID" => Ok(AccrualOutcome::Invalid),
        "PROCESSED" => {
            let amount = match body.accrual {
                Some(raw) => decimal_from_json(&raw)
                    .map_err(|e| AccrualError::Unexpected(e.to_string()))?,
                None => Decimal::ZERO,
            };
            if amount < Decimal::ZERO {
                return Err(AccrualError::Unexpected(format!("negative accrual {amount}")));
            }
            Ok(AccrualOutcome::Resolved(amount))
        }
        other => Err(AccrualError::Unexpected(format!("unknown order status {other}"))),
    }
}

/// Only a positive whole number of seconds counts.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
