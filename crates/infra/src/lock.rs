//! Lease-based mutual exclusion on top of the shared cache.
//!
//! A lease is a single entry in the locks namespace: present means "held",
//! absent means "free". Acquisition is an add-if-absent of the current
//! timestamp. [`LeaseLock::release`] is not owner-checked: whoever calls it
//! frees the lease, and the lock is not reentrant. A [`LeaseGuard`] remembers
//! the timestamp it wrote and only frees the lease while it still carries
//! that value, so a holder whose lease expired cannot free its successor's.
//!
//! `acquire` retries according to a bounded [`RetryPolicy`]. Only a clean
//! "already held" result is retried; a store error fails the call on the spot.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use kvsignals_core::{Namespace, SignalError, SignalResult};

use crate::cache::CacheStore;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct LeaseLock<S> {
    store: S,
    namespace: Namespace,
    policy: RetryPolicy,
    ttl: Option<Duration>,
}

impl<S> LeaseLock<S>
where
    S: CacheStore,
{
    pub fn new(store: S, namespace: Namespace, policy: RetryPolicy) -> Self {
        Self {
            store,
            namespace,
            policy,
            ttl: None,
        }
    }

    /// Let leases expire on their own after `ttl` (covers crashed holders).
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Single non-blocking attempt. Returns whether this call took the lease.
    pub fn try_acquire(&self, key: &str) -> SignalResult<bool> {
        Ok(self.take(key)?.is_some())
    }

    /// Block until the lease is taken, or the retry policy is used up.
    pub fn acquire(&self, key: &str) -> SignalResult<()> {
        self.acquire_stamped(key).map(|_| ())
    }

    /// Returns the timestamp written when this call took the lease.
    fn take(&self, key: &str) -> SignalResult<Option<String>> {
        validate_key(key)?;
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let created = self.store.add_if_absent(
            key,
            JsonValue::String(stamp.clone()),
            &self.namespace,
            self.ttl,
        )?;
        Ok(created.then_some(stamp))
    }

    fn acquire_stamped(&self, key: &str) -> SignalResult<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(stamp) = self.take(key)? {
                if attempt > 1 {
                    debug!(key, attempt, "lease acquired after contention");
                }
                return Ok(stamp);
            }
            if !self.policy.should_retry(attempt) {
                return Err(SignalError::retry_exhausted(format!("acquire lease '{key}'"), attempt));
            }
            self.policy.backoff(attempt);
        }
    }

    /// Free the lease. Releasing a lease nobody holds is a no-op.
    pub fn release(&self, key: &str) -> SignalResult<()> {
        validate_key(key)?;
        Ok(self.store.delete(key, &self.namespace)?)
    }

    /// Free the lease only if it still carries `stamp`.
    ///
    /// The read and the delete are two store calls; this narrows, but does not
    /// close, the window in which a successor's lease could be freed.
    fn release_owned(&self, key: &str, stamp: &str) -> SignalResult<()> {
        match self.store.get(key, &self.namespace)? {
            Some(JsonValue::String(current)) if current == stamp => {
                Ok(self.store.delete(key, &self.namespace)?)
            }
            _ => {
                debug!(key, "lease expired before release; leaving it");
                Ok(())
            }
        }
    }

    /// Scoped acquisition: the returned guard releases the lease when dropped.
    pub fn lock(&self, key: &str) -> SignalResult<LeaseGuard<'_, S>> {
        let stamp = self.acquire_stamped(key)?;
        Ok(LeaseGuard {
            lock: self,
            key: key.to_string(),
            stamp,
            released: false,
        })
    }
}

fn validate_key(key: &str) -> SignalResult<()> {
    if key.is_empty() {
        return Err(SignalError::invalid_argument("lock needs a unique key"));
    }
    Ok(())
}

/// Held lease; released on drop.
///
/// Use [`LeaseGuard::release`] to observe the release result; a failure
/// during drop can only be logged.
#[derive(Debug)]
pub struct LeaseGuard<'a, S>
where
    S: CacheStore,
{
    lock: &'a LeaseLock<S>,
    key: String,
    stamp: String,
    released: bool,
}

impl<S> LeaseGuard<'_, S>
where
    S: CacheStore,
{
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn release(mut self) -> SignalResult<()> {
        self.released = true;
        self.lock.release_owned(&self.key, &self.stamp)
    }
}

impl<S> Drop for LeaseGuard<'_, S>
where
    S: CacheStore,
{
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.lock.release_owned(&self.key, &self.stamp) {
            warn!(key = %self.key, error = %e, "failed to release lease");
        }
    }
}
