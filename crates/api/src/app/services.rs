//! Service wiring: cache backend, signal hub and the demo signal mapping.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;

use kvsignals_core::{Namespace, SignalError};
use kvsignals_infra::{
    CacheStore, ConfigError, DeliverSignals, InMemoryCache, SignalHub, SignalsConfig, StoreError,
};
use kvsignals_signals::{ListenerRegistry, SignalMapping};

use crate::middleware::SignalsState;

/// Namespace the demo listener records into.
pub const DEMO_NAMESPACE: &str = "demo";
/// Signal sent by the demo form and its key in [`DEMO_NAMESPACE`].
pub const DEMO_SIGNAL: &str = "foo";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Signal(#[from] SignalError),
}

/// Process settings for the demo server.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub bind: String,
    pub signals: SignalsConfig,
    /// Only honoured when built with the `redis` feature.
    pub redis_url: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            signals: SignalsConfig::default(),
            redis_url: None,
        }
    }
}

impl ApiSettings {
    pub fn from_env() -> Result<Self, ServiceError> {
        let mut settings = Self {
            signals: SignalsConfig::from_env()?,
            ..Self::default()
        };
        if let Ok(bind) = std::env::var("KVSIGNALS_BIND") {
            settings.bind = bind;
        }
        settings.redis_url = std::env::var("KVSIGNALS_REDIS_URL").ok();
        Ok(settings)
    }
}

#[derive(Clone)]
pub struct AppServices {
    store: Arc<dyn CacheStore>,
    hub: Arc<dyn DeliverSignals>,
    mapping: Arc<SignalMapping>,
}

impl AppServices {
    pub fn new(store: Arc<dyn CacheStore>, config: SignalsConfig) -> Result<Self, ServiceError> {
        let mapping = demo_mapping(store.clone())?;
        let hub = SignalHub::new(store.clone(), config);

        Ok(Self {
            store,
            hub: Arc::new(hub),
            mapping: Arc::new(mapping),
        })
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<dyn DeliverSignals> {
        &self.hub
    }

    pub fn signals_state(&self) -> SignalsState {
        SignalsState {
            hub: self.hub.clone(),
            mapping: self.mapping.clone(),
        }
    }
}

/// Pick the cache backend and wire the services on top of it.
pub fn build_services(settings: &ApiSettings) -> Result<AppServices, ServiceError> {
    AppServices::new(build_store(settings)?, settings.signals.clone())
}

fn build_store(settings: &ApiSettings) -> Result<Arc<dyn CacheStore>, ServiceError> {
    #[cfg(feature = "redis")]
    {
        if let Some(url) = &settings.redis_url {
            info!("using redis cache");
            return Ok(Arc::new(kvsignals_infra::RedisCache::new(url)?));
        }
    }
    #[cfg(not(feature = "redis"))]
    {
        if settings.redis_url.is_some() {
            tracing::warn!("KVSIGNALS_REDIS_URL set but built without the redis feature; ignoring");
        }
    }

    info!("using in-memory cache");
    Ok(Arc::new(InMemoryCache::new()))
}

/// `foo` is delivered weakly to a listener recording its payload in the cache.
pub fn demo_mapping(store: Arc<dyn CacheStore>) -> Result<SignalMapping, SignalError> {
    let registry = ListenerRegistry::new().with("demo.record_foo", move |data: Option<&JsonValue>| {
        info!(signal = DEMO_SIGNAL, data = ?data, "signal received");
        store.set(
            DEMO_SIGNAL,
            data.cloned().unwrap_or(JsonValue::Null),
            &Namespace::new(DEMO_NAMESPACE),
            None,
        )?;
        Ok(())
    });

    SignalMapping::builder()
        .registry(registry)
        .weak(DEMO_SIGNAL, "demo.record_foo")
        .build()
}
