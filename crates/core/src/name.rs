//! Strongly-typed names used as cache keys.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::SignalError;

/// Name of a signal (the key its queue is stored under).
///
/// Always non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignalName(String);

impl SignalName {
    pub fn new(name: impl Into<String>) -> Result<Self, SignalError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SignalError::invalid_argument("signal must have a name"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for SignalName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SignalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for SignalName {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SignalName {
    type Error = SignalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SignalName {
    type Error = SignalError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SignalName> for String {
    fn from(value: SignalName) -> Self {
        value.0
    }
}

/// Cache namespace, isolating one family of keys from another.
///
/// An empty namespace means "no prefix".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Namespace holding signal queues unless configured otherwise.
    pub const DEFAULT_MESSAGES: &'static str = "kvsignals__messages";
    /// Namespace holding leases unless configured otherwise.
    pub const DEFAULT_LOCKS: &'static str = "kvsignals__locks";

    pub fn new(namespace: impl Into<String>) -> Self {
        Self(namespace.into())
    }

    pub fn messages() -> Self {
        Self::new(Self::DEFAULT_MESSAGES)
    }

    pub fn locks() -> Self {
        Self::new(Self::DEFAULT_LOCKS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flat key for backends without native namespacing: `<ns>:<key>`.
    ///
    /// `\` and `:` in the namespace are escaped with `\`, so the first
    /// unescaped `:` ends the namespace and distinct (namespace, key) pairs
    /// never share a flat key. The key is written verbatim.
    pub fn qualify(&self, key: &str) -> String {
        let mut flat = String::with_capacity(self.0.len() + key.len() + 1);
        for c in self.0.chars() {
            if matches!(c, '\\' | ':') {
                flat.push('\\');
            }
            flat.push(c);
        }
        flat.push(':');
        flat.push_str(key);
        flat
    }
}

impl core::fmt::Display for Namespace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Namespace {
    fn from(value: String) -> Self {
        Self(value)
    }
}
