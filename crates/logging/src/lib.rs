//! HopCraft logging setup
//!
//! `RUST_LOG` wins when set; otherwise the given default directive applies.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when neither `RUST_LOG` nor a caller directive is given
pub const DEFAULT_DIRECTIVE: &str = "info,hopcraft=debug";

fn filter(default_directive: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive.unwrap_or(DEFAULT_DIRECTIVE)))
}

/// Install the global subscriber. Panics if one is already installed.
pub fn init_logging(default_directive: Option<&str>) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter(default_directive))
        .init();
}

/// Like `init_logging`, but reports an already installed subscriber instead of panicking
pub fn try_init_logging(default_directive: Option<&str>) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter(default_directive))
        .try_init()
}
