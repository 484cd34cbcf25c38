//! Tracing setup for applications embedding the library.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(debug: bool, verbose: bool) -> &'static str {
    if verbose {
        "trace"
    } else if debug {
        "debug"
    } else {
        "warn" // Quiet by default for normal use
    }
}

/// Install a stderr subscriber. `RUST_LOG` overrides the flags.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(debug: bool, verbose: bool) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug, verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .try_init()?;

    if debug || verbose {
        tracing::info!("Debug logging enabled");
    }
    Ok(())
}
