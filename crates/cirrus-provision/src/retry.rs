//! Retry of cloud calls that fail on eventually consistent references.
//!
//! A resource created a moment ago may not be visible yet to the next call that
//! references it. Those calls fail with [`CloudErrorKind::ReferenceNotFound`] and are
//! retried after a fixed delay. Every other error is permanent and surfaces at once.

use std::future::Future;
use std::time::Duration;

use crate::cloud::{CloudError, CloudErrorKind, CloudResult};
use crate::error::{ProvisionError, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 5).
    pub max_attempts: u32,
    /// Fixed delay between attempts (default: 1 second).
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success(T),
    Exhausted {
        last_error: CloudError,
        attempts: u32,
    },
}

impl<T> RetryOutcome<T> {
    /// Converts into a `Result`, naming the operation in the error.
    pub fn into_result(self, op: &str) -> Result<T> {
        match self {
            RetryOutcome::Success(value) => Ok(value),
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => Err(ProvisionError::Cloud {
                op: op.to_string(),
                attempts,
                source: last_error,
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation`, retrying retryable failures until `max_attempts` is reached.
    pub async fn execute<F, Fut, T>(&self, op: &str, operation: F) -> RetryOutcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return RetryOutcome::Success(value),
                Err(e) if is_retryable(&e) && attempt < max_attempts => {
                    tracing::debug!(
                        "{} attempt {}/{} failed: {}, retrying in {:?}",
                        op,
                        attempt,
                        max_attempts,
                        e,
                        self.config.delay
                    );
                    tokio::time::sleep(self.config.delay).await;
                }
                Err(e) => {
                    return RetryOutcome::Exhausted {
                        last_error: e,
                        attempts: attempt,
                    }
                }
            }
        }
    }

    /// [`execute`](Self::execute) followed by [`RetryOutcome::into_result`].
    pub async fn run<F, Fut, T>(&self, op: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        self.execute(op, operation).await.into_result(op)
    }
}

/// Only references that are not visible yet are worth waiting for.
pub fn is_retryable(error: &CloudError) -> bool {
    match error.kind {
        CloudErrorKind::ReferenceNotFound => true,
        CloudErrorKind::AlreadyExists => false,
        CloudErrorKind::LimitExceeded => false,
        CloudErrorKind::Unauthorized => false,
        CloudErrorKind::InvalidRequest => false,
        CloudErrorKind::Other => false,
    }
}
