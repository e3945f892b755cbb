//! Error types for cutkit
//!
//! Defines the crate error type using thiserror for clear error propagation.
//! Degradable conditions (detached feature manifests, unexported fields) are
//! logged with `tracing::warn!` instead and never surface here.

use thiserror::Error;

/// Main error type for cutkit
#[derive(Error, Debug)]
pub enum Error {
    /// Operation called on a cut that does not satisfy its preconditions
    /// (negative offset, missing recording, ambiguous supervisions, ...)
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Operation refused because it would silently lose data
    #[error("Validation error: {0}")]
    Validation(String),

    /// Value of the wrong kind handed to a writer or a manifest
    #[error("Type contract violated: {0}")]
    TypeContract(String),

    /// Data could not be loaded from a backing store
    #[error("Load error: {0}")]
    Load(String),

    /// Audio or array payload could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid state for operation (e.g. writing to a closed writer)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Feature not available in this build
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors from the shared crate (configuration, ...)
    #[error(transparent)]
    Common(#[from] cutkit_common::Error),
}

/// Convenience Result type using cutkit Error
pub type Result<T> = std::result::Result<T, Error>;

/// Return early with a precondition error unless `cond` holds
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::Error::Precondition(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure;
