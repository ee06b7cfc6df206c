//! Tracing setup shared by the binary and the tests.
//!
//! `RUST_LOG` takes precedence over the configured level so individual
//! modules can be turned up without touching the config file
//! (`RUST_LOG=chanbridge::lora=debug`).

use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG` if set and valid, else from `level`.
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(level)))
}

/// Normalizes a configured level. Unknown names fall back to `info`.
pub(crate) fn directive(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "off" => "off",
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    }
}

pub fn init(level: &str) {
    // try_init: tests and embedding binaries may initialize more than once
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .compact()
        .try_init();
}
