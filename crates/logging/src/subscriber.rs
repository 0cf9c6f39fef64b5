use std::io;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::LogConfig;

/// Builds the event filter for `config`.
///
/// Valid directives take precedence over the verbosity level. Directives that
/// fail to parse fall back to the level so a typo never silences errors.
#[must_use]
pub fn build_filter(config: &LogConfig) -> EnvFilter {
    let level = config.verbosity().level_filter();
    match config.directives() {
        Some(directives) => EnvFilter::try_new(directives)
            .unwrap_or_else(|_| EnvFilter::new(level.to_string())),
        None => EnvFilter::new(level.to_string()),
    }
}

/// Installs the global stderr subscriber.
///
/// Returns `false` when a global subscriber already exists, in which case the
/// existing one is left in place.
pub fn init_tracing(config: &LogConfig) -> bool {
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi())
        .with_target(true);
    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(layer)
        .try_init()
        .is_ok()
}
