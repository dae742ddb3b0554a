//! tracing-subscriber setup for the binary.
//!
//! `CUBELINK_LOG` overrides the configured filter, e.g.
//! `CUBELINK_LOG=cubelink::transport=debug`.

use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_ENV: &str = "CUBELINK_LOG";

/// Installs the global subscriber. `format` is `json` or anything else for text.
pub fn init(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .init(),
        _ => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .init(),
    }
}

pub fn level_is_valid(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

pub fn format_is_valid(format: &str) -> bool {
    matches!(format, "text" | "json")
}
