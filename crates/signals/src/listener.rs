//! Listener registration.
//!
//! A listener is either a handler passed in directly, or a named reference that
//! is resolved through a [`ListenerRegistry`] supplied by the host. Names are
//! resolved once, when a [`SignalMapping`](crate::SignalMapping) is built, so a
//! typo fails at construction time rather than during a delivery pass.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use kvsignals_core::Payload;

/// Shared listener body.
///
/// Receives `Some(value)` for a payload, or `None` when the signal was sent
/// without data (the zero-argument call).
pub type HandlerFn = Arc<dyn Fn(Option<&JsonValue>) -> anyhow::Result<()> + Send + Sync>;

/// A resolved, callable listener.
#[derive(Clone)]
pub struct Listener {
    label: String,
    handler: HandlerFn,
}

impl Listener {
    pub fn new<F>(label: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<&JsonValue>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn from_handler(label: impl Into<String>, handler: HandlerFn) -> Self {
        Self {
            label: label.into(),
            handler,
        }
    }

    /// Name used in logs and failure reports.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Invoke the listener with a queued payload.
    pub fn call(&self, payload: &Payload) -> anyhow::Result<()> {
        (self.handler)(payload.data())
    }
}

impl core::fmt::Debug for Listener {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Listener").field("label", &self.label).finish()
    }
}

/// Named listeners the host makes available to mapping declarations.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a handler under a fully-qualified name.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Option<&JsonValue>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn with<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<&JsonValue>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(name, handler);
        self
    }

    pub fn resolve(&self, name: &str) -> Option<Listener> {
        self.handlers
            .get(name)
            .map(|h| Listener::from_handler(name, h.clone()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("ListenerRegistry").field("names", &names).finish()
    }
}

/// Raw listener declaration, as written in a signal mapping.
///
/// Normalized by [`preprocess`](crate::mapping::preprocess) into a non-empty,
/// ordered list of [`Listener`]s.
#[derive(Clone)]
pub enum ListenerSpec {
    /// A handler passed in directly.
    Handler(Listener),
    /// A fully-qualified reference resolved through the registry.
    Reference(String),
    /// An ordered sequence of handlers and/or references.
    Many(Vec<ListenerSpec>),
}

impl ListenerSpec {
    /// Wrap an anonymous closure.
    pub fn handler<F>(handler: F) -> Self
    where
        F: Fn(Option<&JsonValue>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Handler(Listener::new("<handler>", handler))
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }
}

impl core::fmt::Debug for ListenerSpec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ListenerSpec::Handler(l) => write!(f, "Handler({})", l.label()),
            ListenerSpec::Reference(r) => write!(f, "Reference({r:?})"),
            ListenerSpec::Many(items) => f.debug_list().entries(items).finish(),
        }
    }
}

impl From<Listener> for ListenerSpec {
    fn from(value: Listener) -> Self {
        Self::Handler(value)
    }
}

impl From<&str> for ListenerSpec {
    fn from(value: &str) -> Self {
        Self::Reference(value.to_string())
    }
}

impl From<String> for ListenerSpec {
    fn from(value: String) -> Self {
        Self::Reference(value)
    }
}

impl<T> From<Vec<T>> for ListenerSpec
where
    T: Into<ListenerSpec>,
{
    fn from(value: Vec<T>) -> Self {
        Self::Many(value.into_iter().map(Into::into).collect())
    }
}
