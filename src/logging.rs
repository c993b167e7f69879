//! Tracing subscriber setup for hosts that do not install their own.
//!
//! Library code only emits `tracing` events. Applications embedding this
//! crate usually already have a subscriber; [`init`] is for small hosts,
//! examples, and debugging sessions.
//!
//! Security events use the [`SECURITY_TARGET`](crate::auth::flow::SECURITY_TARGET)
//! target, so `RUST_LOG=inbox_pkce::security=warn` isolates them.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is not set.
fn default_filter(debug: bool) -> &'static str {
    if debug {
        "inbox_pkce=debug"
    } else {
        "inbox_pkce=info"
    }
}

/// Installs a stdout subscriber filtered by `RUST_LOG`.
///
/// Returns false if a global subscriber was already installed.
pub fn init(debug: bool) -> bool {
    let filter = default_filter(debug);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}
