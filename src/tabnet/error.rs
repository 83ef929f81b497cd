//! Error types for TabNet training and inference.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for TabNet operations.
pub type TabNetResult<T> = Result<T, TabNetError>;

/// Errors surfaced by the estimator, the training loop and the dataset adapters.
#[derive(Debug, Error)]
pub enum TabNetError {
    /// Invalid or inconsistent configuration; fatal and raised before any work starts
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Input data that cannot be encoded against the frozen model parameters
    #[error("Data error: {0}")]
    Data(String),

    /// Checkpoint write or read failure
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TabNetError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a data error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }
}

/// Errors that can occur while persisting or restoring a model checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// No file at the requested path
    #[error("Checkpoint not found: {0}")]
    NotFound(PathBuf),

    /// The file exists but is truncated, garbage, or from an incompatible format
    #[error("Checkpoint {path} is not correctly formatted: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// I/O failure while reading or writing
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Model parameters or weights could not be encoded
    #[error("Failed to encode checkpoint: {0}")]
    Encode(String),
}

impl CheckpointError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures the caller is expected to recover from by building a fresh model.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Corrupt { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = TabNetError::config("no training scheme defined");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: no training scheme defined"
        );
    }

    #[test]
    fn test_checkpoint_error_recoverability() {
        assert!(CheckpointError::NotFound(PathBuf::from("/missing.bin")).is_recoverable());
        assert!(CheckpointError::corrupt("/bad.bin", "truncated").is_recoverable());
        let io = CheckpointError::Io {
            path: PathBuf::from("/readonly"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!io.is_recoverable());
    }

    #[test]
    fn test_checkpoint_error_converts_transparently() {
        let err: TabNetError = CheckpointError::NotFound(PathBuf::from("model.bin")).into();
        assert_eq!(err.to_string(), "Checkpoint not found: model.bin");
    }
}
