//! Diagnostic logging setup.

use std::sync::Once;

/// Variable holding the `tracing` filter, e.g. `PYSV_LOG=pysv=debug`.
pub const LOG_ENV: &str = "PYSV_LOG";

static TRACING_INIT: Once = Once::new();

/// Installs a stderr subscriber filtered by `PYSV_LOG`.
///
/// Does nothing unless the variable is set, and never replaces a subscriber the
/// host already installed. Safe to call more than once.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) else {
            return;
        };
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true).with_level(true))
            .with(filter)
            .try_init();
    });
}
