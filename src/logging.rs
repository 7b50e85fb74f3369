//! tracing-subscriber setup for the command-line tool

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::VerbosityLevel;

/// Default filter directive for a verbosity level
pub fn default_directive(verbosity: VerbosityLevel) -> &'static str {
    match verbosity {
        VerbosityLevel::Quiet => "error",
        VerbosityLevel::Normal => "warn",
        VerbosityLevel::Verbose => "info",
        VerbosityLevel::Debug => "debug",
    }
}

/// Build the filter; `RUST_LOG` wins over the verbosity-derived level
pub fn build_env_filter(verbosity: VerbosityLevel) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = default_directive(verbosity);
    EnvFilter::try_new(directive)
        .map_err(|e| anyhow::anyhow!("Invalid tracing filter '{}': {}", directive, e))
}

/// Install a stderr fmt subscriber.
///
/// Calling this twice is an error from the global dispatcher.
pub fn init_logging(verbosity: VerbosityLevel) -> anyhow::Result<()> {
    let filter = build_env_filter(verbosity)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity == VerbosityLevel::Debug)
                .with_ansi(atty::is(atty::Stream::Stderr)),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
