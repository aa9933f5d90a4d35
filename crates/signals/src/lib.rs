//! Signal mechanics: listeners, mappings and cross-call dispatch.
//!
//! Nothing in this crate touches the shared cache; queue storage, locking and
//! delivery passes live in `kvsignals-infra`.

pub mod dispatch;
pub mod listener;
pub mod mapping;

pub use dispatch::{DispatchReport, Dispatcher, FailurePolicy};
pub use listener::{HandlerFn, Listener, ListenerRegistry, ListenerSpec};
pub use mapping::{SignalMapping, SignalMappingBuilder, SignalRoute, preprocess};
