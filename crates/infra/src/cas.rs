//! Optimistic read-transform-write loop over the shared cache.
//!
//! `update` reads the current values of a set of keys together with their CAS
//! tokens, applies a transform to each, and writes them back conditionally.
//! Keys whose write was rejected (another writer changed them in between)
//! are re-read and transformed again, until every key went through or the
//! retry policy is used up.
//!
//! The transform may run several times for the same logical update, so it
//! must be free of side effects beyond its return value.

use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::debug;

use kvsignals_core::{Namespace, SignalError, SignalResult};

use crate::cache::{CacheStore, CasWrite};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct CasMutator<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S> CasMutator<S>
where
    S: CacheStore,
{
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Apply `transform(key, current)` to every key, atomically per key.
    ///
    /// `current` is `None` when the key is absent.
    pub fn update<F>(
        &self,
        keys: &[&str],
        namespace: &Namespace,
        ttl: Option<Duration>,
        transform: F,
    ) -> SignalResult<()>
    where
        F: Fn(&str, Option<&JsonValue>) -> SignalResult<JsonValue>,
    {
        let mut pending: Vec<String> = Vec::with_capacity(keys.len());
        for k in keys {
            if !pending.iter().any(|p| p == k) {
                pending.push(k.to_string());
            }
        }

        let mut attempt = 0;
        while !pending.is_empty() {
            attempt += 1;

            let refs: Vec<&str> = pending.iter().map(String::as_str).collect();
            let current = self.store.cas_read(&refs, namespace)?;

            let writes = pending
                .iter()
                .map(|key| {
                    let entry = current.get(key);
                    let value = transform(key, entry.map(|e| &e.value))?;
                    Ok(CasWrite::new(key.clone(), value, entry.map(|e| e.token)))
                })
                .collect::<SignalResult<Vec<_>>>()?;

            let rejected = self.store.cas_write(writes, namespace, ttl)?;
            if rejected.is_empty() {
                return Ok(());
            }

            if !self.policy.should_retry(attempt) {
                return Err(SignalError::retry_exhausted(
                    format!("cas update of {rejected:?}"),
                    attempt,
                ));
            }

            debug!(
                namespace = %namespace,
                attempt,
                rejected = rejected.len(),
                "cas write rejected; retrying"
            );
            self.policy.backoff(attempt);
            pending = rejected;
        }

        Ok(())
    }
}
