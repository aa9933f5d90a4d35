use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;

use kvsignals_core::{Namespace, SignalError};

/// Opaque compare-and-swap token handed out by [`CacheStore::cas_read`].
pub type CasToken = u64;

/// A value read together with the token a conditional write must present.
#[derive(Debug, Clone, PartialEq)]
pub struct CasEntry {
    pub value: JsonValue,
    pub token: CasToken,
}

/// One conditional write.
///
/// `expected = Some(token)` succeeds only if the entry still carries `token`;
/// `expected = None` succeeds only if the key is still absent.
#[derive(Debug, Clone, PartialEq)]
pub struct CasWrite {
    pub key: String,
    pub value: JsonValue,
    pub expected: Option<CasToken>,
}

impl CasWrite {
    pub fn new(key: impl Into<String>, value: JsonValue, expected: Option<CasToken>) -> Self {
        Self {
            key: key.into(),
            value,
            expected,
        }
    }
}

/// Cache operation error.
///
/// These are **infrastructure errors**. A rejected conditional write is not an
/// error; it is reported through the return value of `add_if_absent` /
/// `cas_write`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache codec error: {0}")]
    Codec(String),
}

impl From<StoreError> for SignalError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unavailable(msg) => SignalError::StoreUnavailable(msg),
            StoreError::Codec(msg) => SignalError::Codec(msg),
        }
    }
}

/// Shared key-value cache with per-key expiration, namespacing and
/// best-effort compare-and-swap.
///
/// This is the only shared mutable resource of the signals system: queues and
/// leases both live here. Implementations make each single-key operation
/// atomic; multi-key operations are batches, not transactions.
///
/// ## Implementation Requirements
///
/// - absent keys are omitted from `get_multi` / `cas_read` results
/// - every successful write (plain or conditional) invalidates previously
///   issued CAS tokens for that key
/// - `delete` of an absent key is a no-op
/// - `ttl = None` means "no expiration"
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str, namespace: &Namespace) -> Result<Option<JsonValue>, StoreError>;

    fn get_multi(
        &self,
        keys: &[&str],
        namespace: &Namespace,
    ) -> Result<HashMap<String, JsonValue>, StoreError>;

    fn set(
        &self,
        key: &str,
        value: JsonValue,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    fn set_multi(
        &self,
        entries: Vec<(String, JsonValue)>,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Insert only if the key is absent. Returns whether this call created it.
    fn add_if_absent(
        &self,
        key: &str,
        value: JsonValue,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    fn delete(&self, key: &str, namespace: &Namespace) -> Result<(), StoreError>;

    /// Read values together with their CAS tokens.
    fn cas_read(
        &self,
        keys: &[&str],
        namespace: &Namespace,
    ) -> Result<HashMap<String, CasEntry>, StoreError>;

    /// Attempt a batch of conditional writes. Returns the keys whose write was
    /// rejected because another writer got there first.
    fn cas_write(
        &self,
        writes: Vec<CasWrite>,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<Vec<String>, StoreError>;
}

impl<S> CacheStore for Arc<S>
where
    S: CacheStore + ?Sized,
{
    fn get(&self, key: &str, namespace: &Namespace) -> Result<Option<JsonValue>, StoreError> {
        (**self).get(key, namespace)
    }

    fn get_multi(
        &self,
        keys: &[&str],
        namespace: &Namespace,
    ) -> Result<HashMap<String, JsonValue>, StoreError> {
        (**self).get_multi(keys, namespace)
    }

    fn set(
        &self,
        key: &str,
        value: JsonValue,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        (**self).set(key, value, namespace, ttl)
    }

    fn set_multi(
        &self,
        entries: Vec<(String, JsonValue)>,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        (**self).set_multi(entries, namespace, ttl)
    }

    fn add_if_absent(
        &self,
        key: &str,
        value: JsonValue,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        (**self).add_if_absent(key, value, namespace, ttl)
    }

    fn delete(&self, key: &str, namespace: &Namespace) -> Result<(), StoreError> {
        (**self).delete(key, namespace)
    }

    fn cas_read(
        &self,
        keys: &[&str],
        namespace: &Namespace,
    ) -> Result<HashMap<String, CasEntry>, StoreError> {
        (**self).cas_read(keys, namespace)
    }

    fn cas_write(
        &self,
        writes: Vec<CasWrite>,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<Vec<String>, StoreError> {
        (**self).cas_write(writes, namespace, ttl)
    }
}
