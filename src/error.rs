//! Error types for touch scoring operations.
//!
//! Every failure maps onto one of three kinds (see [`ErrorKind`]): broken
//! configuration is fatal, a bad input record is recoverable, and a missing
//! inference runtime is fatal at startup.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for scorer operations.
pub type Result<T> = std::result::Result<T, ScorerError>;

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing artifact, dimension mismatch, empty mapping. Aborts the
    /// operation or process startup.
    Configuration,
    /// Unrecognized label, malformed JSON, missing fields. Skipped or
    /// reported inline, never aborts a batch or the service loop.
    InputRecord,
    /// Required inference runtime not present.
    BackendUnavailable,
}

/// Errors that can occur while encoding, training or scoring.
#[derive(Debug, Error)]
pub enum ScorerError {
    /// Gesture label is not part of the label map.
    #[error("unknown gesture label: {label}")]
    UnknownLabel { label: String },

    /// No label code lies within tolerance of the requested value.
    #[error("no gesture label within {tol} of {code}")]
    NoMatch { code: f64, tol: f64 },

    /// Label map definition has the wrong shape or non-numeric values.
    #[error("invalid gesture mapping: {reason}")]
    InvalidMapping { reason: String },

    /// Label map definition has no entries.
    #[error("gesture mapping is empty")]
    EmptyMapping,

    /// Vector width does not match the width an artifact was built for.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Model output does not reconstruct the full input width.
    #[error(
        "model output shape {output} != input shape {input}; expected an autoencoder reconstructing inputs"
    )]
    ShapeMismatch { input: String, output: String },

    /// Threshold is zero, negative or not finite.
    #[error("invalid threshold: {value} (must be finite and > 0)")]
    InvalidThreshold { value: f64 },

    /// Training corpus is empty after filtering.
    #[error("no training data: {reason}")]
    NoData { reason: String },

    /// Batch has no scorable rows after filtering.
    #[error("no scorable rows: {reason}")]
    EmptyBatch { reason: String },

    /// Inference runtime for a backend is not present.
    #[error("inference backend unavailable: {backend} - {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// Artifact file not found at the expected path.
    #[error("artifact not found: {path}")]
    ArtifactNotFound { path: PathBuf },

    /// Artifact exists but cannot be decoded or fails validation.
    #[error("invalid artifact format: {reason}")]
    InvalidFormat { reason: String },

    /// Artifacts on disk do not belong to the same bundle.
    #[error("model bundle mismatch: {reason}")]
    BundleMismatch { reason: String },

    /// A single input record is malformed.
    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },

    /// Configuration value is missing or out of range.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// I/O error during file operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV reading or writing error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Underlying aprender error.
    #[error("aprender error: {0}")]
    Aprender(String),
}

impl ScorerError {
    /// Create a new invalid format error.
    #[must_use]
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }

    /// Create a new invalid record error.
    #[must_use]
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Create a new bundle mismatch error.
    #[must_use]
    pub fn bundle_mismatch(reason: impl Into<String>) -> Self {
        Self::BundleMismatch {
            reason: reason.into(),
        }
    }

    /// Create a new configuration error.
    #[must_use]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a backend unavailable error.
    #[must_use]
    pub fn backend_unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Create a shape mismatch error from two `rows x cols` shapes.
    #[must_use]
    pub fn shape_mismatch(input: (usize, usize), output: (usize, usize)) -> Self {
        Self::ShapeMismatch {
            input: format!("({}, {})", input.0, input.1),
            output: format!("({}, {})", output.0, output.1),
        }
    }

    /// Classify the error for fatal vs. per-record handling.
    ///
    /// JSON and CSV errors raised by the underlying reader or writer are
    /// I/O failures, not bad records.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Serialization(e) if e.is_io() => ErrorKind::Configuration,
            Self::Csv(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => ErrorKind::Configuration,
            Self::UnknownLabel { .. }
            | Self::NoMatch { .. }
            | Self::InvalidRecord { .. }
            | Self::Serialization(_)
            | Self::Csv(_) => ErrorKind::InputRecord,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::InvalidMapping { .. }
            | Self::EmptyMapping
            | Self::DimensionMismatch { .. }
            | Self::ShapeMismatch { .. }
            | Self::InvalidThreshold { .. }
            | Self::NoData { .. }
            | Self::EmptyBatch { .. }
            | Self::ArtifactNotFound { .. }
            | Self::InvalidFormat { .. }
            | Self::BundleMismatch { .. }
            | Self::Config { .. }
            | Self::Io(_)
            | Self::Aprender(_) => ErrorKind::Configuration,
        }
    }

    /// Whether the error must abort the current operation.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::InputRecord
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unknown_label() {
        let err = ScorerError::UnknownLabel {
            label: "PINCH".to_string(),
        };
        assert_eq!(err.to_string(), "unknown gesture label: PINCH");
    }

    #[test]
    fn test_error_display_dimension_mismatch() {
        let err = ScorerError::DimensionMismatch {
            expected: 10,
            actual: 9,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 10, got 9");
    }

    #[test]
    fn test_error_display_shape_mismatch() {
        let err = ScorerError::shape_mismatch((4, 10), (4, 8));
        assert_eq!(
            err.to_string(),
            "model output shape (4, 8) != input shape (4, 10); expected an autoencoder reconstructing inputs"
        );
    }

    #[test]
    fn test_error_display_backend_unavailable() {
        let err = ScorerError::backend_unavailable("compact", "runtime not built in");
        assert_eq!(
            err.to_string(),
            "inference backend unavailable: compact - runtime not built in"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ScorerError = io_err.into();
        assert!(err.to_string().contains("io error"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ScorerError::invalid_record("bad number").kind(),
            ErrorKind::InputRecord
        );
        assert_eq!(ScorerError::EmptyMapping.kind(), ErrorKind::Configuration);
        assert_eq!(
            ScorerError::InvalidThreshold { value: 0.0 }.kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            ScorerError::backend_unavailable("dense", "x").kind(),
            ErrorKind::BackendUnavailable
        );
        assert!(!ScorerError::invalid_record("x").is_fatal());
        assert!(ScorerError::bundle_mismatch("x").is_fatal());
    }

    #[test]
    fn test_parse_errors_are_input_records() {
        let json = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        assert_eq!(ScorerError::from(json).kind(), ErrorKind::InputRecord);
    }

    #[test]
    fn test_write_failures_are_fatal() {
        let broken = || std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");

        let json = ScorerError::from(serde_json::Error::io(broken()));
        assert_eq!(json.kind(), ErrorKind::Configuration);

        let csv = ScorerError::from(csv::Error::from(broken()));
        assert_eq!(csv.kind(), ErrorKind::Configuration);
        assert!(csv.is_fatal());
    }
}
