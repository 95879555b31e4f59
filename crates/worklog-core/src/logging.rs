//! Tracing setup for the `worklog` binary.
//!
//! Diagnostics always go to stderr: stdout carries extracted JSON and NDJSON
//! records and must stay machine-readable.

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives read before `RUST_LOG`.
pub const LOG_ENV: &str = "WORKLOG_LOG";

/// HTTP client internals are noisy at debug level.
const QUIET_DEPENDENCIES: &[&str] = &[
    "hyper=warn",
    "hyper_util=warn",
    "reqwest=warn",
    "rustls=warn",
];

/// Filter from `WORKLOG_LOG`, else `RUST_LOG`, else `level` for everything
/// except the HTTP stack.
pub fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| default_filter(level))
}

fn default_filter(level: Level) -> EnvFilter {
    QUIET_DEPENDENCIES
        .iter()
        .filter_map(|d| d.parse::<Directive>().ok())
        .fold(EnvFilter::new(level.as_str()), |filter, directive| {
            filter.add_directive(directive)
        })
}

/// Install the global subscriber; later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    let filter = build_filter(level);
    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let installed = if json {
        registry.with(layer.json().flatten_event(true)).try_init()
    } else {
        registry.with(layer).try_init()
    };
    if installed.is_ok() {
        tracing::debug!(json, level = %level, "Tracing initialised");
    }
}
