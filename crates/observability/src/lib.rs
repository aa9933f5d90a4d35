//! Process-wide tracing setup shared by the signals binaries.

pub mod tracing;

pub use tracing::LogFormat;

/// Selects the output format: `json` (default) or `compact`.
pub const LOG_FORMAT_ENV: &str = "KVSIGNALS_LOG_FORMAT";

/// Initialize tracing, filtered by `RUST_LOG` (default `info`), in the format
/// named by [`LOG_FORMAT_ENV`].
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init(format_from_env(), "info");
}

fn format_from_env() -> LogFormat {
    std::env::var(LOG_FORMAT_ENV)
        .ok()
        .and_then(|v| LogFormat::parse(&v))
        .unwrap_or_default()
}
