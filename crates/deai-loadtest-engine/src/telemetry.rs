//! Tracing initialisation
//!
//! # Example
//! ```no_run
//! deai_loadtest_engine::telemetry::init_tracing("info,deai_loadtest_engine=debug")
//!     .expect("Failed to initialize tracing");
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Registry};

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "info,deai_loadtest_engine=debug";

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `default_directive`. Fails, rather than panicking,
/// when a global subscriber is already set.
pub fn init_tracing(default_directive: &str) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true);

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
}
