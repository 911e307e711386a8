//! Error types for the monitoring engine.

use thiserror::Error;

/// Errors raised by misconfiguration or an unusable host environment.
///
/// Normal operation never produces errors: missing samples and numeric edge
/// cases resolve to documented defaults instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A custom statistic with this name is already registered on the history.
    #[error("The key \"{0}\" of custom statistic function is occupied")]
    DuplicateStatistic(String),

    /// `start()` was called outside of a tokio runtime.
    #[error("No tokio runtime available to drive the monitor")]
    RuntimeUnavailable,

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A collector could not hook into the host runtime.
    #[error("Instrumentation unavailable: {0}")]
    InstrumentationUnavailable(String),

    /// Loading configuration from files or the environment failed.
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a subscriber while handling a published value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserverError {
    /// The subscriber returned an error.
    #[error("Subscriber rejected value: {0}")]
    Rejected(String),

    /// The subscriber panicked.
    #[error("Subscriber panicked: {0}")]
    Panicked(String),
}
