//! Bounded retry policy for the lease spin loop and the CAS loop.
//!
//! Both loops only retry on a clean "someone else got there first" outcome;
//! store errors are never retried here. When `max_attempts` is used up the
//! operation fails with `SignalError::RetryExhausted`.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between attempts
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included (0 behaves like 1)
    pub max_attempts: u32,
    /// Base delay between attempts
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) spreading contending callers apart
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(64, Duration::from_millis(1), Duration::from_millis(20))
    }
}

impl RetryPolicy {
    /// Default policy for lease acquisition (a holder may run listeners for a while).
    pub fn lease() -> Self {
        Self::exponential(400, Duration::from_millis(1), Duration::from_millis(50))
    }

    /// Default policy for CAS updates.
    pub fn cas() -> Self {
        Self::default()
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.2,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Calculate the delay after a failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_us = self.base_delay.as_micros() as f64;
        let max_us = self.max_delay.as_micros() as f64;

        let delay_us = match self.strategy {
            BackoffStrategy::Fixed => base_us,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(30) as i32);
                (base_us * exp).min(max_us)
            }
            BackoffStrategy::Linear => (base_us * attempt as f64).min(max_us),
        };

        let jitter_range = delay_us * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            jitter_range * (pseudo_random() - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_micros((delay_us + jitter).max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }

    /// Sleep for the backoff following attempt number `attempt`.
    pub fn backoff(&self, attempt: u32) {
        let delay = self.delay_for_attempt(attempt);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// Cheap per-call noise in `[0, 1)`, enough to de-synchronize callers that
/// started retrying at the same instant.
fn pseudo_random() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let thread_salt = {
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        thread::current().id().hash(&mut h);
        h.finish()
    };
    let mixed = (nanos as u64 ^ thread_salt).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (mixed >> 11) as f64 / (1u64 << 53) as f64
}
