//! Log output setup
//!
//! Logs go to stderr; stdout stays free for a plugin host's protocol.

use tracing::Level;
use tracing_subscriber::EnvFilter;

type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn filter(default_level: Level) -> EnvFilter {
    // RUST_LOG wins when set
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(default_level.into()))
}

/// Install the global subscriber; panics if one is already set
pub fn init_logging(default_level: Level) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(default_level))
        .init();
}

/// Like [`init_logging`] but reports an already installed subscriber as an
/// error
pub fn try_init_logging(default_level: Level) -> Result<(), InitError> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(default_level))
        .try_init()
}
