//! Tracing subscriber setup for hosts embedding the engine

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_DIRECTIVES: &str = "activity_engine=debug,zone_core=debug,info";

/// Install the global subscriber with the default filter
///
/// Returns `false` if a subscriber was already installed.
pub fn init() -> bool {
    init_with_default(DEFAULT_DIRECTIVES)
}

/// Install the global subscriber; `RUST_LOG` overrides `directives`
pub fn init_with_default(directives: &str) -> bool {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| directives.into()),
        )
        .try_init()
        .is_ok()
}
