//! Signal error model.

use thiserror::Error;

/// Result type used across the signals crates.
pub type SignalResult<T> = Result<T, SignalError>;

/// Signal-level error.
///
/// Argument and listener errors are deterministic and raised before any store
/// call is made; they are never retried. Store and retry errors come from the
/// shared cache and are propagated to the caller unchanged, since masking them
/// would silently drop messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// An argument failed validation (empty signal name, empty lock key, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A listener registration could not be normalized.
    #[error("invalid listener(s): {0}")]
    InvalidListener(String),

    /// The shared cache could not be reached (or refused the request).
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A listener failed while a payload was dispatched to it.
    #[error("listener '{listener}' failed on signal '{signal}': {message}")]
    ListenerFailure {
        signal: String,
        listener: String,
        message: String,
    },

    /// A bounded retry loop (lease acquisition, CAS update) gave up.
    #[error("{operation} gave up after {attempts} attempts")]
    RetryExhausted { operation: String, attempts: u32 },

    /// A stored value could not be encoded/decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl SignalError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_listener(msg: impl Into<String>) -> Self {
        Self::InvalidListener(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn retry_exhausted(operation: impl Into<String>, attempts: u32) -> Self {
        Self::RetryExhausted {
            operation: operation.into(),
            attempts,
        }
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }
}
