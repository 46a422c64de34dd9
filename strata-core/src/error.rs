//! Error types for Strata
//!
//! Error taxonomy covering binary decoding, dataset synchronization,
//! fetch integrity, and configuration resolution.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for all Strata operations
#[derive(Debug, Error)]
pub enum StrataError {
    // ========== Format Errors ==========

    /// Malformed or corrupt IDX payload
    #[error("Malformed IDX data: {reason}")]
    Format { reason: String },

    // ========== Data Errors ==========

    /// Expected local file absent after synchronization
    #[error(
        "Missing data file {}: shared storage seems unavailable, \
         please download the dataset manually through {location}",
        path.display()
    )]
    MissingData { path: PathBuf, location: String },

    /// Index outside the record arena
    #[error("Index {index} out of bounds for dataset of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Record lacks a field every record is expected to carry
    #[error("Record {index} has no field '{field}'")]
    MissingField { index: usize, field: String },

    // ========== Fetch Errors ==========

    /// Checksum mismatch after download
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Transport-level download failure
    #[error("Fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    /// Archive format the extractor does not handle
    #[error("Extraction of {} not supported", path.display())]
    UnsupportedArchive { path: PathBuf },

    // ========== Configuration Errors ==========

    /// Kind not present in a registry
    #[error("Unknown {registry} kind '{kind}'")]
    UnknownKind { registry: String, kind: String },

    /// Registry key already taken
    #[error("{registry} '{name}' is already registered")]
    DuplicateRegistration { registry: String, name: String },

    /// Class table override of the wrong shape
    #[error("Invalid classes: {reason}")]
    InvalidClasses { reason: String },

    /// Pipeline entry that is neither a stage nor a mapping
    #[error("Invalid pipeline stage: {reason}")]
    InvalidStage { reason: String },

    /// Stage or dataset parameters the factory does not accept
    #[error("Invalid parameters for '{kind}': {reason}")]
    InvalidParams { kind: String, reason: String },

    /// Malformed configuration value
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // ========== I/O Errors ==========

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    // ========== Runtime Errors ==========

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StrataError {
    /// Shorthand for a format error
    pub fn format(reason: impl Into<String>) -> Self {
        StrataError::Format {
            reason: reason.into(),
        }
    }

    /// Returns true if this error is raised while resolving configuration,
    /// before any record is loaded
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StrataError::UnknownKind { .. }
                | StrataError::DuplicateRegistration { .. }
                | StrataError::InvalidClasses { .. }
                | StrataError::InvalidStage { .. }
                | StrataError::InvalidParams { .. }
                | StrataError::InvalidConfig { .. }
        )
    }

    /// Returns true if a fetch may succeed when repeated over another transport
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StrataError::Fetch { .. } | StrataError::Integrity { .. }
        )
    }

    /// Returns true if this error indicates corrupt local or downloaded data
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StrataError::Format { .. } | StrataError::Integrity { .. }
        )
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_data_names_location() {
        let err = StrataError::MissingData {
            path: PathBuf::from("data/mnist/train-images-idx3-ubyte"),
            location: "http://yann.lecun.com/exdb/mnist/".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("train-images-idx3-ubyte"));
        assert!(msg.contains("http://yann.lecun.com/exdb/mnist/"));
    }

    #[test]
    fn test_classification() {
        let unknown = StrataError::UnknownKind {
            registry: "pipeline".into(),
            kind: "Blur".into(),
        };
        assert!(unknown.is_configuration());
        assert!(!unknown.is_retryable());

        let integrity = StrataError::Integrity {
            path: PathBuf::from("a.gz"),
            expected: "md5:00".into(),
            actual: "md5:11".into(),
        };
        assert!(integrity.is_retryable());
        assert!(integrity.is_corruption());
        assert!(!StrataError::format("bad").is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StrataError = io_err.into();
        assert!(matches!(err, StrataError::Io(_)));
    }
}
