use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use kvsignals_core::SignalError;

pub fn signal_error_to_response(err: SignalError) -> axum::response::Response {
    match err {
        SignalError::InvalidArgument(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_argument", msg),
        SignalError::InvalidListener(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "invalid_listener", msg)
        }
        SignalError::StoreUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
        e @ SignalError::RetryExhausted { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "retry_exhausted", e.to_string())
        }
        e @ SignalError::ListenerFailure { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "listener_failure", e.to_string())
        }
        SignalError::Codec(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "codec_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
