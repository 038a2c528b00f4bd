use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Error taxonomy for LeanMQ backend and queue operations.
///
/// Connection-shaped failures are transient and handled by the Gateway's
/// retry wrapper before ever reaching a caller; everything else surfaces
/// immediately (see spec §7's propagation policy).
#[derive(Debug, Error)]
pub enum LeanMqError {
    #[error("backend connection failed after retries: {0}")]
    ConnectionFailure(String),

    #[error("operation against queue '{queue}' failed: {reason}")]
    QueueFailure { queue: String, reason: String },

    #[error("queue '{queue}' does not exist")]
    QueueNotFound { queue: String },

    #[error("DLQ for queue '{queue}' does not exist")]
    DlqNotFound { queue: String },

    #[error("message error: {0}")]
    MessageFailure(String),

    #[error("transaction failed to commit: {0}")]
    TransactionFailure(String),

    #[error("operation attempted after close()")]
    AlreadyClosed,

    #[error("backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Category an error falls into, used to decide retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Worth retrying with backoff (connection-shaped failures).
    Transient,
    /// Never worth retrying (logic errors against a specific queue/message).
    Permanent,
}

impl LeanMqError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LeanMqError::ConnectionFailure(_) => ErrorCategory::Transient,
            LeanMqError::Backend(e) => {
                if is_connection_error(e) {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }
            _ => ErrorCategory::Permanent,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            LeanMqError::ConnectionFailure(_) | LeanMqError::Backend(_)
        ) && self.category() == ErrorCategory::Transient
    }
}

fn is_connection_error(e: &redis::RedisError) -> bool {
    e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() || e.is_io_error()
}

/// Retry policy attached to an [`ErrorCategory`].
#[derive(Debug, Clone, Copy)]
pub enum RetryStrategy {
    NoRetry,
    ExponentialBackoff {
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_retries: u32,
    },
}

impl ErrorCategory {
    pub fn retry_strategy(&self, max_retries: u32, base_delay_ms: u64) -> RetryStrategy {
        match self {
            ErrorCategory::Transient => RetryStrategy::ExponentialBackoff {
                base_delay_ms,
                max_delay_ms: base_delay_ms.saturating_mul(1 << max_retries.min(10)),
                max_retries,
            },
            ErrorCategory::Permanent => RetryStrategy::NoRetry,
        }
    }
}

impl RetryStrategy {
    /// Delay before the given attempt (1-indexed), or `None` once attempts
    /// are exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryStrategy::NoRetry => None,
            RetryStrategy::ExponentialBackoff {
                base_delay_ms,
                max_delay_ms,
                max_retries,
            } => {
                if attempt > *max_retries {
                    return None;
                }
                let exp = base_delay_ms.saturating_mul(1u64 << attempt.min(20));
                let capped = exp.min(*max_delay_ms);
                Some(Duration::from_millis(jitter(capped, attempt)))
            }
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        self.delay_for_attempt(attempt).is_some()
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            RetryStrategy::NoRetry => 0,
            RetryStrategy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }
}

/// Pseudo-random jitter in `[base/2, base]` derived from the attempt number
/// and the current time, so retries across concurrent callers don't
/// synchronize into a thundering herd. Not a cryptographic PRNG, a backoff
/// smoother.
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let mut hasher = DefaultHasher::new();
    attempt.hash(&mut hasher);
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    let spread = hasher.finish() % (base_ms / 2 + 1);
    base_ms / 2 + spread
}

/// Configuration-time failures, distinct from [`LeanMqError`] because they
/// happen before any backend connection exists.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for '{key}': {details}")]
    InvalidValue { key: String, details: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failure_is_transient() {
        assert_eq!(
            LeanMqError::ConnectionFailure("refused".into()).category(),
            ErrorCategory::Transient
        );
    }

    #[test]
    fn queue_not_found_is_permanent() {
        assert_eq!(
            LeanMqError::QueueNotFound {
                queue: "orders".into()
            }
            .category(),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn no_retry_never_delays() {
        assert!(RetryStrategy::NoRetry.delay_for_attempt(1).is_none());
        assert!(!RetryStrategy::NoRetry.should_retry(1));
    }

    #[test]
    fn exponential_backoff_exhausts_after_max_retries() {
        let strategy = RetryStrategy::ExponentialBackoff {
            base_delay_ms: 10,
            max_delay_ms: 1000,
            max_retries: 3,
        };
        assert!(strategy.delay_for_attempt(1).is_some());
        assert!(strategy.delay_for_attempt(3).is_some());
        assert!(strategy.delay_for_attempt(4).is_none());
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let strategy = RetryStrategy::ExponentialBackoff {
            base_delay_ms: 100,
            max_delay_ms: 500,
            max_retries: 10,
        };
        let delay = strategy.delay_for_attempt(10).unwrap();
        assert!(delay.as_millis() as u64 <= 500);
    }

    #[test]
    fn transient_category_yields_backoff_strategy() {
        let strategy = ErrorCategory::Transient.retry_strategy(5, 50);
        assert!(matches!(strategy, RetryStrategy::ExponentialBackoff { .. }));
    }

    #[test]
    fn permanent_category_yields_no_retry() {
        let strategy = ErrorCategory::Permanent.retry_strategy(5, 50);
        assert!(matches!(strategy, RetryStrategy::NoRetry));
    }
}
