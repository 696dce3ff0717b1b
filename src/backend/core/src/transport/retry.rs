//! Retrying transport decorator.
//!
//! Retries are a transport concern: the emitter never re-snapshots for a
//! failed publish. Only errors classified as retryable are attempted again.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Transport, TransportMessage};
use crate::error::{Result, SyncError};

/// Strategy for spacing out retry attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Exponential increase in delay (initial * multiplier^attempt), capped
    Exponential {
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,
        #[serde(with = "humantime_serde")]
        max_delay: Duration,
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay before the given retry (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let secs = initial_delay.as_secs_f64() * multiplier.powi(exponent);
                if secs.is_nan() || secs <= 0.0 {
                    return Duration::ZERO;
                }
                Duration::try_from_secs_f64(secs.min(max_delay.as_secs_f64()))
                    .unwrap_or(*max_delay)
            }
        }
    }

    /// Reject strategies whose delays would shrink or be undefined.
    pub fn validate(&self) -> Result<()> {
        if let Self::Exponential {
            initial_delay,
            max_delay,
            multiplier,
        } = self
        {
            if !multiplier.is_finite() || *multiplier < 1.0 {
                return Err(SyncError::configuration(format!(
                    "backoff multiplier must be a finite number >= 1.0, got {}",
                    multiplier
                )));
            }
            if initial_delay > max_delay {
                return Err(SyncError::configuration(
                    "backoff initial_delay must not exceed max_delay",
                ));
            }
        }
        Ok(())
    }
}

/// How many times and how often a publish is retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: BackoffStrategy::Fixed { delay },
        }
    }
}

/// Wraps a transport and retries retryable publish failures.
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingTransport<T> {
    async fn publish(&self, message: TransportMessage) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.inner.publish(message.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff.delay_for_attempt(attempt);
                    tracing::warn!(
                        transport = self.inner.name(),
                        bundle = %message.key,
                        version = %message.version,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
