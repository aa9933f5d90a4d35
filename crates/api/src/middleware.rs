use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{debug, error};

use kvsignals_infra::DeliverSignals;
use kvsignals_signals::SignalMapping;

use crate::app::errors::json_error;

#[derive(Clone)]
pub struct SignalsState {
    pub hub: Arc<dyn DeliverSignals>,
    pub mapping: Arc<SignalMapping>,
}

/// Run one delivery pass before handing the request on.
///
/// Delivery talks to the cache synchronously, so it runs on the blocking
/// pool. A failed pass answers `503` and the request is not processed; the
/// undelivered payloads stay queued for the next request.
pub async fn signals_middleware(
    State(state): State<SignalsState>,
    req: Request,
    next: Next,
) -> Response {
    if state.mapping.is_empty() {
        return next.run(req).await;
    }

    let SignalsState { hub, mapping } = state;
    match tokio::task::spawn_blocking(move || hub.deliver_signals(&mapping)).await {
        Ok(Ok(delivered)) => {
            if delivered > 0 {
                debug!(delivered, path = %req.uri().path(), "signals delivered before request");
            }
        }
        Ok(Err(e)) => {
            error!(error = %e, "signal delivery failed");
            return json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "signal_delivery_failed",
                e.to_string(),
            );
        }
        Err(e) => {
            error!(error = %e, "signal delivery task aborted");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "signal delivery aborted",
            );
        }
    }

    next.run(req).await
}
