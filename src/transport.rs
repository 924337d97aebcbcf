//! Resilient transport
//!
//! Every backend call goes through [`ResilientTransport`], which bounds each
//! attempt with a timeout and retries transient faults with exponential
//! backoff and jitter. The shared `reqwest::Client` used by HTTP-based
//! backends is built here with the same timeout.

use crate::{Error, Result};
use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Upper bound for a single attempt.
    pub timeout: Duration,
    /// Retries after the first attempt; total attempts are `1 + max_retries`.
    pub max_retries: usize,
    /// First backoff delay, doubled on every retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

pub struct ResilientTransport {
    config: TransportConfig,
    http: Client,
}

impl ResilientTransport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// HTTP client carrying the per-request timeout.
    pub fn http_client(&self) -> Client {
        self.http.clone()
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        // ExponentialBackoff yields factor * 2^n ms for a base of 2.
        let factor = (self.config.base_delay.as_millis() as u64 / 2).max(1);

        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.config.max_delay)
            .map(jitter)
            .take(self.config.max_retries)
    }

    async fn attempt<T, Fut>(timeout: Duration, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    /// Run an idempotent operation, retrying transient failures.
    ///
    /// Non-transient errors are returned unchanged on the first occurrence.
    /// Running out of retries yields [`Error::TransportExhausted`] wrapping
    /// the last failure.
    pub async fn retrying<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.config.timeout;
        let mut attempts = 0usize;

        let result = RetryIf::spawn(
            self.backoff(),
            || {
                attempts += 1;
                Self::attempt(timeout, f())
            },
            |e: &Error| {
                let transient = e.is_transient();
                if transient {
                    warn!("{} attempt failed: {}. Will retry...", op, e);
                }
                transient
            },
        )
        .await;

        match result {
            Err(e) if e.is_transient() => {
                error!("{} failed after {} attempts: {}", op, attempts, e);
                Err(Error::TransportExhausted {
                    attempts,
                    source: Box::new(e),
                })
            }
            other => other,
        }
    }

    /// Run a non-idempotent operation once, bounded by the timeout only.
    pub async fn once<T, F, Fut>(&self, op: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        Self::attempt(self.config.timeout, f()).await.map_err(|e| {
            if e.is_transient() {
                warn!("{} failed and will not be retried: {}", op, e);
            }
            e
        })
    }
}
