//! Helpers related to tracing, used by main entrypoints

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize tracing with the default configuration.
///
/// `RUST_LOG` takes precedence; otherwise only warnings are shown, or
/// everything down to debug (including child commandlines) if `verbose`.
pub fn initialize_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };

    // When running as root, also send key messages to the journal.
    let journald_layer = if rustix::process::getuid().is_root() {
        tracing_journald::layer()
            .ok()
            .map(|layer| layer.with_filter(LevelFilter::INFO))
    } else {
        None
    };

    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(format)
        .with_writer(std::io::stderr)
        .with_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        );

    // Option<Layer> is itself a layer, so the journal is simply skipped when absent.
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(journald_layer)
        .init();
}
