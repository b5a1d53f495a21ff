//! Retrying transaction runner
//!
//! Each attempt opens a fresh store transaction, runs the body under a
//! timeout and commits on success. A failed body rolls back. Transient
//! failures (serialization races, an unavailable backend, timeouts) are
//! retried with backoff until the policy is exhausted.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, SchedulingError};
use crate::store::{SchedulingStore, StoreTransaction};

/// Delay growth between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay
    Fixed,
    /// Linear increase
    Linear,
    /// Exponential backoff
    Exponential,
    /// Exponential with jitter
    ExponentialJitter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt budget, including commit
    pub timeout_ms: u64,
    pub backoff: BackoffStrategy,
}

impl Default for TransactionPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 25,
            max_delay_ms: 1000,
            timeout_ms: 5000,
            backoff: BackoffStrategy::Exponential,
        }
    }
}

impl TransactionPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let exponential = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry - 1));
        let delay_ms = match self.backoff {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(u64::from(retry)),
            BackoffStrategy::Exponential => exponential,
            BackoffStrategy::ExponentialJitter => {
                let capped = exponential.min(self.max_delay_ms);
                capped.saturating_add(rand::thread_rng().gen_range(0..=capped / 2))
            }
        };
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Runs closures inside serializable store transactions with retry
pub struct TransactionRunner {
    store: Arc<dyn SchedulingStore>,
    policy: TransactionPolicy,
}

impl TransactionRunner {
    pub fn new(store: Arc<dyn SchedulingStore>, policy: TransactionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &TransactionPolicy {
        &self.policy
    }

    /// Run `body` until it commits or fails permanently.
    ///
    /// The body receives the open transaction by value and hands it back
    /// together with its result, so it can borrow the transaction mutably
    /// for the whole attempt. It may be invoked several times and must not
    /// have side effects outside the transaction.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut body: F) -> Result<T>
    where
        F: FnMut(Box<dyn StoreTransaction>) -> Fut,
        Fut: Future<Output = (Box<dyn StoreTransaction>, Result<T>)>,
    {
        let timeout = self.policy.timeout();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(timeout, self.attempt(&mut body)).await {
                Ok(result) => result,
                Err(_) => Err(SchedulingError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.policy.timeout_ms,
                }),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "Transaction committed after retry");
                    } else {
                        debug!(operation, "Transaction committed");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_transient() && attempt <= self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient transaction failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) if error.is_transient() => {
                    warn!(operation, attempts = attempt, error = %error, "Transaction retries exhausted");
                    return Err(exhausted(operation, attempt, error));
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn attempt<T, F, Fut>(&self, body: &mut F) -> Result<T>
    where
        F: FnMut(Box<dyn StoreTransaction>) -> Fut,
        Fut: Future<Output = (Box<dyn StoreTransaction>, Result<T>)>,
    {
        let tx = self.store.begin().await?;
        let (tx, result) = body(tx).await;
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(error = %rollback_error, "Rollback failed");
                }
                Err(error)
            }
        }
    }
}

fn exhausted(operation: &str, attempts: u32, error: SchedulingError) -> SchedulingError {
    match error {
        timeout @ SchedulingError::Timeout { .. } => timeout,
        other => SchedulingError::TransactionFailed {
            operation: operation.to_string(),
            attempts,
            reason: other.to_string(),
        },
    }
}
