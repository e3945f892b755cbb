//! Common error types for cutkit

use thiserror::Error;

/// Common result type for cutkit shared operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared across cutkit crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Time grid that cannot be expressed in samples
    #[error("Invalid timing: {0}")]
    Timing(String),
}
