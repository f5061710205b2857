//! Tracing subscriber setup for binaries and tests.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to whoever owns the process. Output goes to stderr so CLI stdout stays
//! machine-readable JSON.

use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "MODRUNNER_LOG";

/// Install a stderr subscriber. Safe to call more than once; later calls are
/// no-ops.
pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("modrunner=debug,info")
        } else {
            EnvFilter::new("modrunner=info,warn")
        }
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}
