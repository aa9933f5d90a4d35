//! Signals configuration: namespaces, expirations, retry bounds and the
//! listener failure policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use kvsignals_core::Namespace;
use kvsignals_signals::FailurePolicy;

use crate::retry::RetryPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: expected {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    pub messages_namespace: Namespace,
    pub locks_namespace: Namespace,
    /// Expiration of queue writes. `None` keeps queues until drained.
    pub message_ttl: Option<Duration>,
    /// Expiration of leases. `None` means a lease lives until released.
    pub lease_ttl: Option<Duration>,
    pub lock_retry: RetryPolicy,
    pub cas_retry: RetryPolicy,
    pub listener_failures: FailurePolicy,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            messages_namespace: Namespace::messages(),
            locks_namespace: Namespace::locks(),
            message_ttl: None,
            lease_ttl: None,
            lock_retry: RetryPolicy::lease(),
            cas_retry: RetryPolicy::cas(),
            listener_failures: FailurePolicy::Suppress,
        }
    }
}

impl SignalsConfig {
    pub fn with_namespaces(
        mut self,
        messages: impl Into<Namespace>,
        locks: impl Into<Namespace>,
    ) -> Self {
        self.messages_namespace = messages.into();
        self.locks_namespace = locks.into();
        self
    }

    pub fn with_message_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.message_ttl = ttl;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_lock_retry(mut self, policy: RetryPolicy) -> Self {
        self.lock_retry = policy;
        self
    }

    pub fn with_cas_retry(mut self, policy: RetryPolicy) -> Self {
        self.cas_retry = policy;
        self
    }

    pub fn with_listener_failures(mut self, policy: FailurePolicy) -> Self {
        self.listener_failures = policy;
        self
    }

    /// Defaults overridden by `KVSIGNALS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`SignalsConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ns) = lookup("KVSIGNALS_MESSAGES_NAMESPACE") {
            config.messages_namespace = Namespace::new(ns);
        }
        if let Some(ns) = lookup("KVSIGNALS_LOCKS_NAMESPACE") {
            config.locks_namespace = Namespace::new(ns);
        }
        if let Some(ms) = parse::<u64>(&lookup, "KVSIGNALS_MESSAGE_TTL_MS", "milliseconds")? {
            config.message_ttl = ttl_from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "KVSIGNALS_LEASE_TTL_MS", "milliseconds")? {
            config.lease_ttl = ttl_from_millis(ms);
        }
        if let Some(n) = parse::<u32>(&lookup, "KVSIGNALS_LOCK_MAX_ATTEMPTS", "an attempt count")? {
            config.lock_retry = config.lock_retry.with_max_attempts(n);
        }
        if let Some(n) = parse::<u32>(&lookup, "KVSIGNALS_CAS_MAX_ATTEMPTS", "an attempt count")? {
            config.cas_retry = config.cas_retry.with_max_attempts(n);
        }
        if let Some(propagate) =
            parse_flag(&lookup, "KVSIGNALS_PROPAGATE_LISTENER_ERRORS")?
        {
            config.listener_failures = if propagate {
                FailurePolicy::Propagate
            } else {
                FailurePolicy::Suppress
            };
        }

        Ok(config)
    }
}

// 0 disables expiration.
fn ttl_from_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value: raw,
        })
}

fn parse_flag(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            var,
            expected: "a boolean",
            value: raw,
        }),
    }
}
