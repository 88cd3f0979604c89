//! Tracing subscriber setup
//!
//! The library only emits `tracing` events. Applications that have no
//! subscriber of their own can call [`init_logging`]; `RUST_LOG` overrides the
//! default `info` filter.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber. Returns false if one was already installed.
pub fn init_logging() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
