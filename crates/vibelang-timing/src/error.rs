//! Error types for the vibelang-timing crate.

use thiserror::Error;

/// Errors that can occur while parsing time values, scheduling events or
/// editing automation.
///
/// Every variant is surfaced to the caller; a rejected operation leaves the
/// previously scheduled state untouched.
#[derive(Error, Debug)]
pub enum Error {
    /// A time or notation string could not be parsed.
    #[error("Failed to parse time '{input}': {reason}")]
    Parse { input: String, reason: String },

    /// A value is outside the mathematical domain of the operation,
    /// e.g. an exponential ramp towards zero or across a sign change.
    #[error("Domain error: {0}")]
    Domain(String),

    /// A duration, tick count or size is outside the accepted bounds.
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// The operation is not valid in the current playback state.
    #[error("Invalid state: {0}")]
    State(String),

    /// Configuration file or value error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The scheduling runtime could not be started or reached.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    pub(crate) fn parse(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Parse {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
