//! Tracing setup for hosts that do not install their own subscriber.
//!
//! The library itself only emits `tracing` events. Hosts with an existing
//! subscriber should skip this entirely.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (for example `"geofence=info"`).
///
/// Returns false when a global subscriber was already set; calling this more
/// than once is harmless.
pub fn init_tracing(default_directive: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let fmt_layer = fmt::layer().with_target(true).with_level(true).with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
