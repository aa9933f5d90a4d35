//! `kvsignals-core`: signal building blocks.
//!
//! This crate contains the **pure** primitives shared by every layer (no store
//! access, no listener code).

pub mod error;
pub mod name;
pub mod payload;

pub use error::{SignalError, SignalResult};
pub use name::{Namespace, SignalName};
pub use payload::Payload;
