use std::path::PathBuf;

use crate::value::PropertyKind;

/// Errors from property table operations.
#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    /// A value exists under the key but is not of the requested type.
    #[error("type mismatch for {key}: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: PropertyKind,
        found: PropertyKind,
    },

    /// The operation is not valid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// I/O error while reading or writing a settings file.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An internal lock was poisoned by a panicking thread.
    #[error("property table lock poisoned")]
    LockPoisoned,
}

impl PropertyError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for errors that are the caller's fault and should not be retried.
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. } | Self::InvalidOperation(_))
    }
}

/// Result alias for property table operations.
pub type PropertyResult<T> = Result<T, PropertyError>;
