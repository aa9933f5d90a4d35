//! Demo endpoints: send `foo` from a form-like POST and read back what its
//! listener recorded.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use kvsignals_core::{Namespace, Payload, SignalError};
use kvsignals_infra::{CacheStore, DeliverSignals, Reliability};

use crate::app::errors::{json_error, signal_error_to_response};
use crate::app::services::{AppServices, DEMO_NAMESPACE, DEMO_SIGNAL};

#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(default)]
    pub reliable: bool,
}

/// Last payload recorded by the `foo` listener (`null` until one arrived).
pub async fn last(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let outcome = blocking(move || {
        services
            .store()
            .get(DEMO_SIGNAL, &Namespace::new(DEMO_NAMESPACE))
            .map_err(SignalError::from)
    })
    .await;

    match outcome {
        Ok(last) => Json(json!({ "last": last })).into_response(),
        Err(resp) => resp,
    }
}

/// Queue `foo` weakly; it is delivered before a later request is handled.
pub async fn send_foo(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<SendRequest>,
) -> Response {
    send(services, DEMO_SIGNAL.to_string(), req.data, Reliability::Weak).await
}

pub async fn send_named(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
    Json(req): Json<SendRequest>,
) -> Response {
    let reliability = Reliability::from(req.reliable);
    send(services, name, req.data, reliability).await
}

async fn send(
    services: Arc<AppServices>,
    name: String,
    data: Option<JsonValue>,
    reliability: Reliability,
) -> Response {
    let echoed = data.clone();
    let signal = name.clone();
    let outcome = blocking(move || {
        services
            .hub()
            .send_signal(&name, Payload::from(data), reliability)
    })
    .await;

    match outcome {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "signal": signal,
                "data": echoed,
                "reliable": reliability == Reliability::Reliable,
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

/// Run cache work on the blocking pool, mapping failures to responses.
async fn blocking<T, F>(f: F) -> Result<T, Response>
where
    F: FnOnce() -> Result<T, SignalError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(signal_error_to_response(e)),
        Err(e) => {
            tracing::error!(error = %e, "blocking task aborted");
            Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "request aborted",
            ))
        }
    }
}
