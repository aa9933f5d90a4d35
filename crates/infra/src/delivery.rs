//! Delivery passes: drain mapped queues and hand their payloads to listeners.
//!
//! Reliable signals are drained one at a time under their own lease, so the
//! read, the dispatch and the clear form one critical section with respect to
//! other reliable drains. Dispatch runs inside the
//! lease; a slow listener holds up every other drain of the same signal.
//!
//! Weak signals are drained as one batch without locking: one CAS read of
//! every queue, one batch of conditional clears, then dispatch. A queue that
//! changed between the read and its clear is neither cleared nor dispatched;
//! the next pass takes it whole. Only payloads whose clear succeeded are
//! dispatched and counted, so a weak payload is handed out at most once.
//!
//! Reliable senders do not take the lease, so the clear is a CAS update that
//! removes only the dispatched prefix: payloads appended while the listeners
//! ran stay queued for the next pass. The prefix is removed only if the queue
//! still starts with exactly the payloads that were dispatched. With a lease
//! TTL shorter than a dispatch, two drains can hold the same prefix; the
//! second clear then finds it gone and leaves the queue alone, so the overlap
//! costs a redelivery and never a send.
//!
//! "Reliable" means no lost sends and serialized drains. It is at-least-once:
//! if the pass fails after dispatch but before the clear, the same payloads
//! are dispatched again on the next pass.

use std::time::Duration;

use tracing::{debug, info, warn};

use kvsignals_core::{Namespace, Payload, SignalResult};
use kvsignals_signals::{DispatchReport, Dispatcher, SignalMapping};

use crate::cache::{CacheStore, CasWrite};
use crate::cas::CasMutator;
use crate::lock::LeaseLock;
use crate::retry::RetryPolicy;
use crate::signal::{decode_queue, encode_queue};

#[derive(Debug, Clone)]
pub struct DeliveryEngine<S> {
    store: S,
    namespace: Namespace,
    ttl: Option<Duration>,
    lock: LeaseLock<S>,
    cas: CasMutator<S>,
    dispatcher: Dispatcher,
}

impl<S> DeliveryEngine<S>
where
    S: CacheStore + Clone,
{
    /// `namespace` is where the queues live; `lock` guards reliable drains.
    pub fn new(store: S, namespace: Namespace, lock: LeaseLock<S>, dispatcher: Dispatcher) -> Self {
        Self {
            cas: CasMutator::new(store.clone(), RetryPolicy::cas()),
            store,
            namespace,
            ttl: None,
            lock,
            dispatcher,
        }
    }

    /// Retry bound of the post-dispatch clear.
    pub fn with_cas_retry(mut self, policy: RetryPolicy) -> Self {
        self.cas = CasMutator::new(self.store.clone(), policy);
        self
    }

    /// Expiration applied when a drained queue is rewritten.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn lock(&self) -> &LeaseLock<S> {
        &self.lock
    }

    /// Run the reliable group, then the weak group. Returns the number of
    /// payloads dispatched.
    pub fn deliver(&self, mapping: &SignalMapping) -> SignalResult<usize> {
        let reliable = self.deliver_reliable(mapping)?;
        let weak = self.deliver_weak(mapping)?;
        Ok(reliable + weak)
    }

    pub fn deliver_reliable(&self, mapping: &SignalMapping) -> SignalResult<usize> {
        let mut delivered = 0;
        let mut report = DispatchReport::default();

        for route in mapping.reliable() {
            let name = route.name().as_str();
            let guard = self.lock.lock(name)?;

            let payloads = decode_queue(self.store.get(name, &self.namespace)?.as_ref())?;
            if !payloads.is_empty() {
                // On error the guard is dropped here, leaving the queue intact.
                report.merge(self.dispatcher.dispatch(route.name(), route.listeners(), &payloads)?);
                self.remove_prefix(name, &payloads)?;
                debug!(signal = name, delivered = payloads.len(), "reliable signal drained");
            }

            guard.release()?;
            delivered += payloads.len();
        }

        log_pass("reliable", delivered, report);
        Ok(delivered)
    }

    pub fn deliver_weak(&self, mapping: &SignalMapping) -> SignalResult<usize> {
        let routes = mapping.weak();
        if routes.is_empty() {
            return Ok(0);
        }

        let keys: Vec<&str> = routes.iter().map(|r| r.name().as_str()).collect();
        let stored = self.store.cas_read(&keys, &self.namespace)?;

        let mut taken = Vec::new();
        let mut clears = Vec::new();
        for route in routes {
            let name = route.name().as_str();
            let Some(entry) = stored.get(name) else {
                continue;
            };
            let payloads = decode_queue(Some(&entry.value))?;
            if payloads.is_empty() {
                continue;
            }
            clears.push(CasWrite::new(name, encode_queue(&[]), Some(entry.token)));
            taken.push((route, payloads));
        }
        if clears.is_empty() {
            return Ok(0);
        }

        let changed = self.store.cas_write(clears, &self.namespace, self.ttl)?;
        if !changed.is_empty() {
            debug!(signals = ?changed, "weak queues changed before the clear; left for the next pass");
        }

        let mut delivered = 0;
        let mut report = DispatchReport::default();
        for (route, payloads) in &taken {
            if changed.iter().any(|c| c.as_str() == route.name().as_str()) {
                continue;
            }
            report.merge(self.dispatcher.dispatch(route.name(), route.listeners(), payloads)?);
            delivered += payloads.len();
        }

        log_pass("weak", delivered, report);
        Ok(delivered)
    }

    /// Drop `dispatched` from the head of the queue, if it is still there.
    fn remove_prefix(&self, name: &str, dispatched: &[Payload]) -> SignalResult<()> {
        self.cas
            .update(&[name], &self.namespace, self.ttl, |_, current| {
                let mut queue = decode_queue(current)?;
                if queue.starts_with(dispatched) {
                    queue.drain(..dispatched.len());
                } else {
                    warn!(
                        signal = name,
                        dispatched = dispatched.len(),
                        "queue no longer starts with the dispatched payloads; leaving it"
                    );
                }
                Ok(encode_queue(&queue))
            })
    }
}

fn log_pass(group: &'static str, delivered: usize, report: DispatchReport) {
    if delivered > 0 {
        info!(
            group,
            delivered,
            invocations = report.invocations,
            failures = report.failures,
            "delivery pass finished"
        );
    }
}
