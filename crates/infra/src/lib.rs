//! Infrastructure layer: shared cache, leases, CAS, sending and delivery.

pub mod cache;
pub mod cas;
pub mod config;
pub mod delivery;
pub mod hub;
pub mod lock;
pub mod retry;
pub mod signal;

mod integration_tests;

pub use cache::{CacheStore, InMemoryCache, StoreError};
#[cfg(feature = "redis")]
pub use cache::RedisCache;
pub use cas::CasMutator;
pub use config::{ConfigError, SignalsConfig};
pub use delivery::DeliveryEngine;
pub use hub::{DeliverSignals, SignalHub};
pub use lock::{LeaseGuard, LeaseLock};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use signal::{Outgoing, Reliability, SignalSender};
