//! Redis-backed cache (optional).
//!
//! Each entry is stored as a hash `{v: <json>, t: <cas token>}` under
//! the namespace-qualified key. Tokens are drawn from a single `INCR` sequence
//! so a delete-then-recreate never reissues a token a reader may still hold.
//! Every write goes through a Lua script, which keeps it atomic on the server.

use std::collections::HashMap;
use std::time::Duration;

use redis::{FromRedisValue, Script};
use serde_json::Value as JsonValue;

use kvsignals_core::Namespace;

use super::r#trait::{CacheStore, CasEntry, CasWrite, StoreError};

/// Token sequence. It holds no `:`, so no qualified entry key can equal it.
const SEQUENCE_KEY: &str = "kvsignals.cas-sequence";

// KEYS[1] = sequence, KEYS[2..] = entries; ARGV[1] = ttl, ARGV[i] = value of KEYS[i].
const SET_SCRIPT: &str = r#"
local ttl = tonumber(ARGV[1])
for i = 2, #KEYS do
  local t = redis.call('INCR', KEYS[1])
  redis.call('DEL', KEYS[i])
  redis.call('HSET', KEYS[i], 'v', ARGV[i], 't', t)
  if ttl > 0 then redis.call('PEXPIRE', KEYS[i], ttl) end
end
return #KEYS - 1
"#;

const ADD_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 1 then return 0 end
local t = redis.call('INCR', KEYS[1])
redis.call('HSET', KEYS[2], 'v', ARGV[1], 't', t)
if tonumber(ARGV[2]) > 0 then redis.call('PEXPIRE', KEYS[2], ARGV[2]) end
return 1
"#;

// KEYS[1] = sequence, KEYS[2..] = entries; ARGV[1] = ttl, then an
// (expected token, value) pair per entry. An empty token means "absent".
// Returns one 1 (written) or 0 (rejected) per entry.
const CAS_SCRIPT: &str = r#"
local ttl = tonumber(ARGV[1])
local results = {}
for i = 2, #KEYS do
  local expected = ARGV[2 * i - 2]
  local current = redis.call('HGET', KEYS[i], 't')
  local ok
  if expected == '' then ok = not current else ok = current == expected end
  if ok then
    local t = redis.call('INCR', KEYS[1])
    redis.call('DEL', KEYS[i])
    redis.call('HSET', KEYS[i], 'v', ARGV[2 * i - 1], 't', t)
    if ttl > 0 then redis.call('PEXPIRE', KEYS[i], ttl) end
    results[#results + 1] = 1
  else
    results[#results + 1] = 0
  end
end
return results
"#;

/// Redis cache for signal queues and leases.
///
/// Multi-key writes run as one script call, so `set_multi` and `cas_write`
/// cost a single round trip whatever the batch size.
#[derive(Debug, Clone)]
pub struct RedisCache {
    client: redis::Client,
    set_script: Script,
    add_script: Script,
    cas_script: Script,
}

impl RedisCache {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(unavailable)?;
        Ok(Self {
            client,
            set_script: Script::new(SET_SCRIPT),
            add_script: Script::new(ADD_SCRIPT),
            cas_script: Script::new(CAS_SCRIPT),
        })
    }

    fn connection(&self) -> Result<redis::Connection, StoreError> {
        self.client.get_connection().map_err(unavailable)
    }

    fn write_all(
        &self,
        entries: &[(String, JsonValue)],
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let call = ScriptCall::set(entries, namespace, ttl)?;
        let _: i64 = call.invoke(&self.set_script, &mut self.connection()?)?;
        Ok(())
    }
}

/// KEYS and ARGV of one batched script call.
#[derive(Debug, PartialEq)]
struct ScriptCall {
    keys: Vec<String>,
    args: Vec<String>,
}

impl ScriptCall {
    fn new(ttl: Option<Duration>) -> Self {
        Self {
            keys: vec![SEQUENCE_KEY.to_string()],
            args: vec![ttl_millis(ttl).to_string()],
        }
    }

    fn set(
        entries: &[(String, JsonValue)],
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let mut call = Self::new(ttl);
        for (key, value) in entries {
            call.keys.push(namespace.qualify(key));
            call.args.push(encode(value)?);
        }
        Ok(call)
    }

    fn cas(writes: &[CasWrite], namespace: &Namespace, ttl: Option<Duration>) -> Result<Self, StoreError> {
        let mut call = Self::new(ttl);
        for w in writes {
            call.keys.push(namespace.qualify(&w.key));
            call.args.push(w.expected.map(|t| t.to_string()).unwrap_or_default());
            call.args.push(encode(&w.value)?);
        }
        Ok(call)
    }

    fn invoke<T: FromRedisValue>(&self, script: &Script, conn: &mut redis::Connection) -> Result<T, StoreError> {
        let mut invocation = script.prepare_invoke();
        for key in &self.keys {
            invocation.key(key);
        }
        for arg in &self.args {
            invocation.arg(arg);
        }
        invocation.invoke(conn).map_err(unavailable)
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn encode(value: &JsonValue) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode(raw: &str) -> Result<JsonValue, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Codec(e.to_string()))
}

fn ttl_millis(ttl: Option<Duration>) -> u64 {
    ttl.map(|t| (t.as_millis() as u64).max(1)).unwrap_or(0)
}

impl CacheStore for RedisCache {
    fn get(&self, key: &str, namespace: &Namespace) -> Result<Option<JsonValue>, StoreError> {
        let mut conn = self.connection()?;
        let raw: Option<String> = redis::cmd("HGET")
            .arg(namespace.qualify(key))
            .arg("v")
            .query(&mut conn)
            .map_err(unavailable)?;
        raw.as_deref().map(decode).transpose()
    }

    fn get_multi(
        &self,
        keys: &[&str],
        namespace: &Namespace,
    ) -> Result<HashMap<String, JsonValue>, StoreError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.connection()?;
        let mut pipe = redis::pipe();
        for k in keys {
            pipe.cmd("HGET").arg(namespace.qualify(k)).arg("v");
        }
        let raw: Vec<Option<String>> = pipe.query(&mut conn).map_err(unavailable)?;

        let mut out = HashMap::with_capacity(keys.len());
        for (k, v) in keys.iter().zip(raw) {
            if let Some(v) = v {
                out.insert(k.to_string(), decode(&v)?);
            }
        }
        Ok(out)
    }

    fn set(
        &self,
        key: &str,
        value: JsonValue,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.write_all(&[(key.to_string(), value)], namespace, ttl)
    }

    fn set_multi(
        &self,
        entries: Vec<(String, JsonValue)>,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        self.write_all(&entries, namespace, ttl)
    }

    fn add_if_absent(
        &self,
        key: &str,
        value: JsonValue,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let created: i64 = self
            .add_script
            .key(SEQUENCE_KEY)
            .key(namespace.qualify(key))
            .arg(encode(&value)?)
            .arg(ttl_millis(ttl))
            .invoke(&mut conn)
            .map_err(unavailable)?;
        Ok(created == 1)
    }

    fn delete(&self, key: &str, namespace: &Namespace) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: i64 = redis::cmd("DEL")
            .arg(namespace.qualify(key))
            .query(&mut conn)
            .map_err(unavailable)?;
        Ok(())
    }

    fn cas_read(
        &self,
        keys: &[&str],
        namespace: &Namespace,
    ) -> Result<HashMap<String, CasEntry>, StoreError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.connection()?;
        let mut pipe = redis::pipe();
        for k in keys {
            pipe.cmd("HMGET").arg(namespace.qualify(k)).arg("v").arg("t");
        }
        let raw: Vec<(Option<String>, Option<u64>)> = pipe.query(&mut conn).map_err(unavailable)?;

        let mut out = HashMap::with_capacity(keys.len());
        for (k, entry) in keys.iter().zip(raw) {
            if let (Some(v), Some(token)) = entry {
                out.insert(
                    k.to_string(),
                    CasEntry {
                        value: decode(&v)?,
                        token,
                    },
                );
            }
        }
        Ok(out)
    }

    fn cas_write(
        &self,
        writes: Vec<CasWrite>,
        namespace: &Namespace,
        ttl: Option<Duration>,
    ) -> Result<Vec<String>, StoreError> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }

        let call = ScriptCall::cas(&writes, namespace, ttl)?;
        let written: Vec<i64> = call.invoke(&self.cas_script, &mut self.connection()?)?;
        if written.len() != writes.len() {
            return Err(StoreError::Codec(format!(
                "cas script answered {} results for {} writes",
                written.len(),
                writes.len()
            )));
        }

        Ok(writes
            .into_iter()
            .zip(written)
            .filter(|(_, ok)| *ok != 1)
            .map(|(w, _)| w.key)
            .collect())
    }
}
