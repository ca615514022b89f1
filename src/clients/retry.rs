//! Retry policy for transient transport failures.
//!
//! Implements exponential backoff with jitter.

use super::error::TransportError;
use crate::config::GeneralSettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry, in seconds.
    pub initial_backoff_secs: f64,
    /// Cap for exponential growth, in seconds.
    pub max_backoff_secs: f64,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
    /// Upper bound of the random extra fraction added to each backoff.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(settings: &GeneralSettings) -> Self {
        Self {
            max_retries: settings.retry_attempts,
            initial_backoff_secs: settings.retry_backoff_secs,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter:
    /// `initial * multiplier^(retry - 1)`, capped at `max_backoff_secs`.
    pub fn base_backoff_secs(&self, retry: u32) -> f64 {
        let exp = retry.saturating_sub(1) as i32;
        (self.initial_backoff_secs * self.backoff_multiplier.powi(exp)).min(self.max_backoff_secs)
    }

    /// Backoff with jitter applied.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_backoff_secs(retry);
        let factor = if self.jitter > 0.0 {
            1.0 + rand::rng().random_range(0.0..=self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((base * factor).max(0.0))
    }

    /// Check if an error should be retried after `retries_done` retries.
    pub fn should_retry(&self, error: &TransportError, retries_done: u32) -> bool {
        error.is_retryable() && retries_done < self.max_retries
    }

    /// Run `op` until it succeeds, fails permanently or runs out of retries.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, retries) => {
                    retries += 1;
                    let wait = self.backoff(retries);
                    warn!(
                        "{} failed ({}), retry {}/{} in {:.2}s",
                        label,
                        e,
                        retries,
                        self.max_retries,
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    debug!("{} failed permanently after {} retries: {}", label, retries, e);
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_secs: 1.0,
            max_backoff_secs: 30.0,
            backoff_multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
