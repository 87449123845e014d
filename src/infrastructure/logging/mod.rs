// Logging module - Logging infrastructure
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging system. `RUST_LOG` overrides `level`; calling this
/// more than once keeps the first subscriber.
pub fn init_logging(level: &str, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose { "debug" } else { level };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("commhub={},warn", level)))
        .unwrap_or_else(|_| EnvFilter::new("commhub=info,warn"));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(verbose)
                .with_file(verbose)
                .with_line_number(verbose),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("CommHub logging system initialized");
    }
    Ok(())
}
