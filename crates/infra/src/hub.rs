//! Host-facing facade: one object wiring config, store, sender and engine.

use kvsignals_core::{Payload, SignalResult};
use kvsignals_signals::{Dispatcher, SignalMapping};

use crate::cache::CacheStore;
use crate::config::SignalsConfig;
use crate::delivery::DeliveryEngine;
use crate::lock::LeaseLock;
use crate::signal::{Outgoing, Reliability, SignalSender};

/// Object-safe view of a hub, for hosts that keep `Arc<dyn DeliverSignals>`.
pub trait DeliverSignals: Send + Sync {
    fn send_signal(&self, name: &str, payload: Payload, reliability: Reliability) -> SignalResult<()>;

    fn send_signals(&self, signals: Vec<Outgoing>, reliability: Reliability) -> SignalResult<()>;

    /// One delivery pass over both groups. Returns the number of payloads dispatched.
    fn deliver_signals(&self, mapping: &SignalMapping) -> SignalResult<usize>;
}

#[derive(Debug, Clone)]
pub struct SignalHub<S> {
    config: SignalsConfig,
    sender: SignalSender<S>,
    engine: DeliveryEngine<S>,
}

impl<S> SignalHub<S>
where
    S: CacheStore + Clone,
{
    pub fn new(store: S, config: SignalsConfig) -> Self {
        let sender = SignalSender::new(
            store.clone(),
            config.messages_namespace.clone(),
            config.cas_retry.clone(),
        )
        .with_ttl(config.message_ttl);

        let lock = LeaseLock::new(
            store.clone(),
            config.locks_namespace.clone(),
            config.lock_retry.clone(),
        )
        .with_ttl(config.lease_ttl);

        let engine = DeliveryEngine::new(
            store,
            config.messages_namespace.clone(),
            lock,
            Dispatcher::new(config.listener_failures),
        )
        .with_cas_retry(config.cas_retry.clone())
        .with_ttl(config.message_ttl);

        Self {
            config,
            sender,
            engine,
        }
    }

    pub fn config(&self) -> &SignalsConfig {
        &self.config
    }

    pub fn send(
        &self,
        name: &str,
        payload: impl Into<Payload>,
        reliability: impl Into<Reliability>,
    ) -> SignalResult<()> {
        self.sender.send(name, payload, reliability)
    }

    pub fn send_multi<I>(&self, signals: I, reliability: impl Into<Reliability>) -> SignalResult<()>
    where
        I: IntoIterator,
        I::Item: Into<Outgoing>,
    {
        self.sender.send_multi(signals, reliability)
    }

    pub fn deliver(&self, mapping: &SignalMapping) -> SignalResult<usize> {
        self.engine.deliver(mapping)
    }

    pub fn deliver_reliable(&self, mapping: &SignalMapping) -> SignalResult<usize> {
        self.engine.deliver_reliable(mapping)
    }

    pub fn deliver_weak(&self, mapping: &SignalMapping) -> SignalResult<usize> {
        self.engine.deliver_weak(mapping)
    }

    /// The lease lock reliable drains use, for host code that wants to
    /// serialize its own work with them.
    pub fn lease_lock(&self) -> &LeaseLock<S> {
        self.engine.lock()
    }
}

impl<S> DeliverSignals for SignalHub<S>
where
    S: CacheStore + Clone,
{
    fn send_signal(&self, name: &str, payload: Payload, reliability: Reliability) -> SignalResult<()> {
        self.send(name, payload, reliability)
    }

    fn send_signals(&self, signals: Vec<Outgoing>, reliability: Reliability) -> SignalResult<()> {
        self.send_multi(signals, reliability)
    }

    fn deliver_signals(&self, mapping: &SignalMapping) -> SignalResult<usize> {
        self.deliver(mapping)
    }
}
