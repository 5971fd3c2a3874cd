//! Shared tracing/logging initialization.
//!
//! The CLI and any embedding host set up `tracing_subscriber` the same way:
//! an env-filter plus either human-readable or JSON output on stderr.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"cipherline=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt)
            .init();
    }
}

/// Log targets of every workspace crate plus the `cipherline` binary.
const TARGETS: &[&str] = &[
    "cipherline",
    "cipherline_cli",
    "cipherline_client",
    "cipherline_core",
    "cipherline_crypto",
    "cipherline_proto",
];

/// Initialise tracing from the resolved logging configuration.
///
/// The configured level applies to every `cipherline` crate.
pub fn init_from_config(logging: &LoggingConfig) {
    init_tracing(&default_filter(&logging.level), logging.json);
}

fn default_filter(level: &str) -> String {
    TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}
