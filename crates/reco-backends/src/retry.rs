//! Retry policies and async retry helper for backend calls.

use std::future::Future;
use std::time::Duration;

#[cfg(feature = "random-jitter")]
use rand::Rng;

use reco_kernel::error::{BackendError, BackendResult};

/// Delay strategy between retry attempts.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Same delay every attempt.
    Fixed { delay_ms: u64 },
    /// Delay increases linearly: `base_ms * attempt`.
    Linear { base_ms: u64 },
    /// Exponential backoff capped at `max_ms`, with optional jitter.
    ///
    /// When the `random-jitter` feature is enabled, jitter is uniformly
    /// distributed in \[75%, 100%\] of the capped delay, avoiding correlated
    /// retries (thundering herd). Without the feature, a deterministic
    /// ±12.5% alternation is used instead.
    ExponentialBackoff {
        base_ms: u64,
        max_ms: u64,
        jitter: bool,
    },
}

impl RetryPolicy {
    /// Returns the sleep duration before the given retry attempt (0-indexed).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let ms = match self {
            RetryPolicy::Fixed { delay_ms } => *delay_ms,
            RetryPolicy::Linear { base_ms } => base_ms.saturating_mul((attempt + 1) as u64),
            RetryPolicy::ExponentialBackoff {
                base_ms,
                max_ms,
                jitter,
            } => {
                let exp = 1u64
                    .checked_shl(attempt as u32)
                    .and_then(|s| base_ms.checked_mul(s))
                    .unwrap_or(*max_ms);
                let capped = exp.min(*max_ms);
                if *jitter {
                    #[cfg(feature = "random-jitter")]
                    {
                        // Random jitter: uniform in [75%, 100%] of capped delay.
                        // Prevents correlated retries (thundering herd).
                        let min_delay = capped.saturating_mul(3) / 4;
                        rand::thread_rng()
                            .gen_range(min_delay..=capped)
                            .min(*max_ms)
                    }
                    #[cfg(not(feature = "random-jitter"))]
                    {
                        // Deterministic jitter: ±12.5% alternation.
                        let eighth = capped / 8;
                        if attempt % 2 == 0 {
                            capped.saturating_add(eighth)
                        } else {
                            capped.saturating_sub(eighth)
                        }
                        .min(*max_ms)
                    }
                } else {
                    capped
                }
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::ExponentialBackoff {
            base_ms: 100,
            max_ms: 1_600,
            jitter: false,
        }
    }
}

/// How many attempts to make and which [`RetryPolicy`] to use.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    /// Total attempts (1 = no retry).
    pub max_attempts: usize,
    pub policy: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            policy: RetryPolicy::default(),
        }
    }
}

impl RetryConfig {
    /// Exponential backoff starting at `base_ms`, doubling per attempt.
    pub fn exponential(max_attempts: usize, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_attempts,
            policy: RetryPolicy::ExponentialBackoff {
                base_ms,
                max_ms,
                jitter: true,
            },
        }
    }
}

/// Retry `f` up to `config.max_attempts` times, never sleeping past
/// `budget`.
///
/// The budget is the caller's remaining phase/deadline allowance: when
/// the next backoff delay would overrun it, the helper stops retrying
/// and returns the last error.
pub async fn retry_with_budget<F, Fut, T>(
    config: &RetryConfig,
    mut budget: Duration,
    mut f: F,
) -> BackendResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackendResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = config.policy.delay_for(attempt - 1);
            if delay >= budget {
                break;
            }
            budget -= delay;
            tokio::time::sleep(delay).await;
        }
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| BackendError::Other("no attempts made".into())))
}
