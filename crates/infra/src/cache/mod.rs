//! Shared key-value cache boundary.
//!
//! Queues and leases both live in a cache that offers get/set/delete,
//! add-if-absent and compare-and-swap with per-key expiration and
//! namespacing. This module defines that capability set without assuming a
//! concrete backend.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod r#trait;

pub use in_memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use redis_store::RedisCache;
pub use r#trait::{CacheStore, CasEntry, CasToken, CasWrite, StoreError};
