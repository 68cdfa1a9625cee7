//! Process-wide `tracing` subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Environment;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "wifimap_server=info,tower_http=info";

/// Installs the global subscriber: JSON lines in production, compact text
/// elsewhere. Returns `false` if a subscriber was already installed.
pub fn init(environment: &Environment) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if environment.is_production() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .try_init()
    };
    result.is_ok()
}
