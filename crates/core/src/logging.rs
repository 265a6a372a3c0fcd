//! Structured logging setup for the verifier.
//!
//! Log level comes from `RUST_LOG` and defaults to `info`. The JSON variant
//! is meant for production, where the structured stream doubles as a
//! searchable copy of the audit trail.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize human-readable logging.
///
/// # Example
/// ```no_run
/// use attest_core::logging;
///
/// logging::init();
/// tracing::info!("verifier started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize JSON logging.
///
/// # Example
/// ```no_run
/// use attest_core::logging;
///
/// logging::init_json();
/// tracing::info!(attestation_id = "0x..", "verdict recorded");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize logging in the requested format.
pub fn init_with_format(format: LogFormat) {
    match format {
        LogFormat::Pretty => init(),
        LogFormat::Json => init_json(),
    }
}
