//! Cross-call dispatch of queued payloads to listeners.
//!
//! Pairing rule: **every** listener registered for a signal receives **every**
//! payload drained for it. Payloads are visited in arrival order; for each
//! payload, listeners run in registration order.
//!
//! Listener invocations are isolated from each other: an error (or panic)
//! raised by one listener does not prevent the remaining listeners/payloads
//! from being dispatched, unless the dispatcher is configured to propagate.
//! Nothing is returned to the sender.

use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::warn;

use kvsignals_core::{Payload, SignalError, SignalName, SignalResult};

use crate::listener::Listener;

/// What to do when a listener fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and keep dispatching.
    #[default]
    Suppress,
    /// Stop at the first failure and return it (useful in tests).
    Propagate,
}

/// Outcome of dispatching one signal's payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invocations: usize,
    pub failures: usize,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.invocations += other.invocations;
        self.failures += other.failures;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    policy: FailurePolicy,
}

impl Dispatcher {
    pub fn new(policy: FailurePolicy) -> Self {
        Self { policy }
    }

    /// Call every listener with every payload.
    ///
    /// Under [`FailurePolicy::Propagate`] the first failing invocation aborts
    /// the dispatch with `ListenerFailure`; invocations already made are not
    /// undone.
    pub fn dispatch(
        &self,
        signal: &SignalName,
        listeners: &[Listener],
        payloads: &[Payload],
    ) -> SignalResult<DispatchReport> {
        let mut report = DispatchReport::default();

        for payload in payloads {
            for listener in listeners {
                report.invocations += 1;

                let Err(message) = invoke(listener, payload) else {
                    continue;
                };
                report.failures += 1;

                match self.policy {
                    FailurePolicy::Suppress => {
                        warn!(
                            signal = %signal,
                            listener = listener.label(),
                            error = %message,
                            "listener failed; continuing"
                        );
                    }
                    FailurePolicy::Propagate => {
                        return Err(SignalError::ListenerFailure {
                            signal: signal.to_string(),
                            listener: listener.label().to_string(),
                            message,
                        });
                    }
                }
            }
        }

        Ok(report)
    }
}

fn invoke(listener: &Listener, payload: &Payload) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(|| listener.call(payload))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
