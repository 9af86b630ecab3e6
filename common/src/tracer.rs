use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Installs the global `fmt` subscriber.
///
/// The filter is read from `RUST_LOG`, falling back to `default_level` when the variable is unset.
/// # Parameters
/// - default_level: the maximum level emitted when no directives are given in the environment.
pub fn init_tracer(default_level: LevelFilter) -> Result<(), TracerError> {
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| TracerError::Install(e.to_string()))
}
