//! Tracing subscriber setup
//!
//! Log level follows `RUST_LOG`, defaulting to `llamachat=info`. llama.cpp's
//! own logs are forwarded into the same subscriber by the engine.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "llamachat=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Installs the global subscriber.
///
/// Returns `false` if a subscriber was already installed, which happens when a
/// host calls the C ABI initializer more than once.
pub fn init_logging() -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter())
        .try_init()
        .is_ok()
}
