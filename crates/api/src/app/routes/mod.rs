use axum::{
    Router,
    routing::{get, post},
};

pub mod demo;
pub mod system;

/// Router for the demo endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/", get(demo::last).post(demo::send_foo))
        .route("/signals/:name", post(demo::send_named))
}
