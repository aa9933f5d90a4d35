//! Sending signals: appending payloads to per-signal queues.
//!
//! A queue is stored under the signal name in the messages namespace as a
//! JSON array; `null` elements are no-data markers. A missing key is an empty
//! queue.
//!
//! Weak sends make a single read-append-write attempt. The write is
//! conditional on the queue being unchanged since the read; if another sender
//! or a drain got there first, the payload is dropped. Weak sends can
//! therefore lose payloads under contention, but never write back a queue a
//! drain has already taken, so a drained payload is not delivered again.
//! Reliable sends go through [`CasMutator`], which retries rejected writes,
//! and never lose a payload to a concurrent sender.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::debug;

use kvsignals_core::{Namespace, Payload, SignalError, SignalName, SignalResult};

use crate::cache::{CacheStore, CasWrite};
use crate::cas::CasMutator;
use crate::retry::RetryPolicy;

/// Decode a stored queue. A missing value is an empty queue.
pub fn decode_queue(stored: Option<&JsonValue>) -> SignalResult<Vec<Payload>> {
    match stored {
        None => Ok(Vec::new()),
        Some(JsonValue::Array(items)) => Ok(items.iter().cloned().map(Payload::new).collect()),
        Some(other) => Err(SignalError::codec(format!(
            "expected a queue (JSON array), found {other}"
        ))),
    }
}

pub fn encode_queue(payloads: &[Payload]) -> JsonValue {
    JsonValue::Array(
        payloads
            .iter()
            .map(|p| p.data().cloned().unwrap_or(JsonValue::Null))
            .collect(),
    )
}

/// Delivery guarantee requested by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reliability {
    #[default]
    Weak,
    Reliable,
}

impl From<bool> for Reliability {
    fn from(reliable: bool) -> Self {
        if reliable { Self::Reliable } else { Self::Weak }
    }
}

/// One entry of a batched send: a name, with or without data.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub name: String,
    pub payload: Payload,
}

impl Outgoing {
    pub fn new(name: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

impl From<&str> for Outgoing {
    fn from(name: &str) -> Self {
        Self::new(name, Payload::no_data())
    }
}

impl From<String> for Outgoing {
    fn from(name: String) -> Self {
        Self::new(name, Payload::no_data())
    }
}

impl<P> From<(&str, P)> for Outgoing
where
    P: Into<Payload>,
{
    fn from((name, payload): (&str, P)) -> Self {
        Self::new(name, payload)
    }
}

#[derive(Debug, Clone)]
pub struct SignalSender<S> {
    store: S,
    namespace: Namespace,
    ttl: Option<Duration>,
    cas: CasMutator<S>,
}

impl<S> SignalSender<S>
where
    S: CacheStore + Clone,
{
    pub fn new(store: S, namespace: Namespace, cas_retry: RetryPolicy) -> Self {
        Self {
            cas: CasMutator::new(store.clone(), cas_retry),
            store,
            namespace,
            ttl: None,
        }
    }

    /// Expiration applied to every queue write.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn send(
        &self,
        name: &str,
        payload: impl Into<Payload>,
        reliability: impl Into<Reliability>,
    ) -> SignalResult<()> {
        self.send_multi([Outgoing::new(name, payload)], reliability)
    }

    /// Append to several queues with one read and one write (one CAS loop for
    /// reliable sends), whatever the number of names.
    ///
    /// Names are validated before any store call. Several entries for the
    /// same name are appended in the given order.
    pub fn send_multi<I>(&self, signals: I, reliability: impl Into<Reliability>) -> SignalResult<()>
    where
        I: IntoIterator,
        I::Item: Into<Outgoing>,
    {
        let batches = group_by_name(signals)?;
        if batches.is_empty() {
            return Ok(());
        }
        let keys: Vec<&str> = batches.iter().map(|(name, _)| name.as_str()).collect();

        match reliability.into() {
            Reliability::Weak => {
                let current = self.store.cas_read(&keys, &self.namespace)?;
                let writes = batches
                    .iter()
                    .map(|(name, payloads)| {
                        let entry = current.get(name.as_str());
                        let mut queue = decode_queue(entry.map(|e| &e.value))?;
                        queue.extend(payloads.iter().cloned());
                        Ok(CasWrite::new(name.as_str(), encode_queue(&queue), entry.map(|e| e.token)))
                    })
                    .collect::<SignalResult<Vec<_>>>()?;
                let dropped = self.store.cas_write(writes, &self.namespace, self.ttl)?;
                if !dropped.is_empty() {
                    debug!(signals = ?dropped, "weak send lost a race; payloads dropped");
                }
            }
            Reliability::Reliable => {
                let appended: HashMap<&str, &[Payload]> = batches
                    .iter()
                    .map(|(name, payloads)| (name.as_str(), payloads.as_slice()))
                    .collect();
                self.cas.update(&keys, &self.namespace, self.ttl, |key, current| {
                    let mut queue = decode_queue(current)?;
                    if let Some(payloads) = appended.get(key) {
                        queue.extend(payloads.iter().cloned());
                    }
                    Ok(encode_queue(&queue))
                })?;
            }
        }

        debug!(signals = keys.len(), "signals sent");
        Ok(())
    }
}

/// Validate names and gather payloads per name, keeping first-seen order.
fn group_by_name<I>(signals: I) -> SignalResult<Vec<(SignalName, Vec<Payload>)>>
where
    I: IntoIterator,
    I::Item: Into<Outgoing>,
{
    let mut batches: Vec<(SignalName, Vec<Payload>)> = Vec::new();
    for outgoing in signals {
        let Outgoing { name, payload } = outgoing.into();
        let name = SignalName::new(name)?;
        match batches.iter_mut().find(|(n, _)| *n == name) {
            Some((_, payloads)) => payloads.push(payload),
            None => batches.push((name, vec![payload])),
        }
    }
    Ok(batches)
}
