use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;

use kvsignals_core::Namespace;

use super::r#trait::{CacheStore, CasEntry, CasToken, CasWrite, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    namespace: String,
    key: String,
}

impl EntryKey {
    fn new(key: &str, namespace: &Namespace) -> Self {
        Self {
            namespace: namespace.as_str().to_string(),
            key: key.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: JsonValue,
    token: CasToken,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory cache.
///
/// Intended for tests/dev and single-process hosts. Every single-key operation
/// is atomic; expired entries are treated as absent and dropped lazily on the
/// next write to their key.
///
/// `set_available(false)` makes every call fail with
/// [`StoreError::Unavailable`], to exercise outage handling.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<EntryKey, Entry>>,
    next_token: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of live entries across all namespaces.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|e| e.values().filter(|v| v.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<EntryKey, Entry>>, StoreError> {
        self.check_available()?;
        self.entries
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<EntryKey, Entry>>, StoreError> {
        self.check_available()?;
        self.entries
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory cache switched off".to_string()));
        }
        Ok(())
    }

    fn fresh_entry(&self, value: JsonValue, ttl: Option<Duration>) -> Entry {
        Entry {
            value,
            token: self.next_token.fetch_add(1, Ordering::SeqCst) + 1,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn live<'a>(
        entries: &'a HashMap<EntryKey, Entry>,
        key: &EntryKey,
        now: Instant,
    ) -> Option<&'a Entry> {
        entries.get(key).filter(|e| e.is_live(now))
    }
}

impl CacheStore for InMemoryCache {
    fn get(&self, key: &str, namespace: &Namespace) -> Result<Option<JsonValue>, StoreError> {
        let entries = self.read()?;
        let key = EntryKey::new(key, namespace);
        Ok(Self::live(&entries, &key, Instant::now()).map(|e| e.value.clone()))
    }

    fn get_multi(
        &self,
        keys: &[&str],
        namespace: &Namespace,
    ) -> Result<HashMap<String, JsonValue>, StoreError> {
        let entries = self.read()?;
        let now = Instant::now();

        Ok(keys
            .iter()
            .filter_map(|k| {
                Self::live(&entries, &EntryKey::new(k, namespace), now)
                    .map(|e| (k.to_string(), e.value.clone()))
            })
            .collect())
    }

    fn set(
        &self,
        key: &str,
        value: JsonValue,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut entries = self.write()?;
        entries.insert(EntryKey::new(key, namespace), self.fresh_entry(value, ttl));
        Ok(())
    }

    fn set_multi(
        &self,
        values: Vec<(String, JsonValue)>,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut entries = self.write()?;
        for (key, value) in values {
            entries.insert(EntryKey::new(&key, namespace), self.fresh_entry(value, ttl));
        }
        Ok(())
    }

    fn add_if_absent(
        &self,
        key: &str,
        value: JsonValue,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut entries = self.write()?;
        let key = EntryKey::new(key, namespace);

        if Self::live(&entries, &key, Instant::now()).is_some() {
            return Ok(false);
        }
        entries.insert(key, self.fresh_entry(value, ttl));
        Ok(true)
    }

    fn delete(&self, key: &str, namespace: &Namespace) -> Result<(), StoreError> {
        let mut entries = self.write()?;
        entries.remove(&EntryKey::new(key, namespace));
        Ok(())
    }

    fn cas_read(
        &self,
        keys: &[&str],
        namespace: &Namespace,
    ) -> Result<HashMap<String, CasEntry>, StoreError> {
        let entries = self.read()?;
        let now = Instant::now();

        Ok(keys
            .iter()
            .filter_map(|k| {
                Self::live(&entries, &EntryKey::new(k, namespace), now).map(|e| {
                    (
                        k.to_string(),
                        CasEntry {
                            value: e.value.clone(),
                            token: e.token,
                        },
                    )
                })
            })
            .collect())
    }

    fn cas_write(
        &self,
        writes: Vec<CasWrite>,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<Vec<String>, StoreError> {
        let mut entries = self.write()?;
        let now = Instant::now();
        let mut rejected = Vec::new();

        for w in writes {
            let key = EntryKey::new(&w.key, namespace);
            let current = Self::live(&entries, &key, now).map(|e| e.token);

            let accepted = match (w.expected, current) {
                (Some(expected), Some(current)) => expected == current,
                (None, None) => true,
                _ => false,
            };

            if accepted {
                entries.insert(key, self.fresh_entry(w.value, ttl));
            } else {
                rejected.push(w.key);
            }
        }

        Ok(rejected)
    }
}
