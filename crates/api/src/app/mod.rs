//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: cache backend, signal hub, demo mapping
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Every route, health included, is preceded by a signal delivery pass.
pub fn build_app(services: services::AppServices) -> Router {
    let signals_state = services.signals_state();
    let services = Arc::new(services);

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(axum::middleware::from_fn_with_state(
            signals_state,
            middleware::signals_middleware,
        ))
        .layer(Extension(services))
}
