//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Default filter for a verbosity level. `quiet` wins over `-v`.
pub fn filter_for(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "warn";
    }
    match verbosity {
        0 => "info,voxshift=info",
        1 => "info,voxshift=debug",
        _ => "trace",
    }
}

/// Installs the global subscriber, writing to stderr so the console prompt
/// and metrics line on stdout stay readable. `RUST_LOG` overrides the
/// verbosity flags. Calling it twice is harmless.
pub fn init(verbosity: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for(verbosity, quiet)));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
