//! Structured logging setup. Nothing in this crate exports metrics
//! externally, so this stays a plain `tracing-subscriber` init rather
//! than a full OpenTelemetry/Prometheus stack; see DESIGN.md.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber reading `RUST_LOG` (falling
/// back to `info`). Call once at process startup.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}
