//! Opt-in tracing setup for binaries and tests.
//!
//! The engine itself only emits `tracing` events; installing a subscriber
//! is the embedder's call. [`init`] wires the usual stack (env-filtered
//! fmt layer plus span traces on errors) for embedders that don't need
//! anything fancier.

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DIRECTIVES: &str = "info";

/// Installs a global subscriber honoring `RUST_LOG`, defaulting to `info`.
/// Does nothing if a subscriber is already installed.
pub fn init() {
    init_with_directives(DEFAULT_DIRECTIVES);
}

/// Like [`init`] with explicit fallback directives, e.g.
/// `"warn,waymark=debug"`.
pub fn init_with_directives(directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives))
        .unwrap_or_default();
    let fmt_layer = fmt::layer().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init();
}
