//! Integration with aprender's `.apr` model format.
//!
//! The full-precision backend is persisted as an `.apr` file so its weights
//! travel with a format header (name, description, version) that can be
//! inspected without deserializing the model.

use crate::error::{Result, ScorerError};
use aprender::format::{self, ModelInfo, ModelType, SaveOptions};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

/// Header-level view of a saved `.apr` model.
#[derive(Debug, Clone)]
pub struct ModelFileInfo {
    inner: ModelInfo,
}

impl ModelFileInfo {
    /// Inspect an `.apr` file without loading the full model.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let info = format::inspect(path).map_err(|e| ScorerError::Aprender(e.to_string()))?;
        Ok(Self { inner: info })
    }

    /// Model type recorded in the header.
    #[must_use]
    pub fn model_type(&self) -> ModelType {
        self.inner.model_type
    }

    /// Format version.
    #[must_use]
    pub fn version(&self) -> (u8, u8) {
        self.inner.format_version
    }

    /// Model name if recorded.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.metadata.model_name.as_deref()
    }

    /// Model description if recorded.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.inner.metadata.description.as_deref()
    }

    /// Stored payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.inner.payload_size
    }
}

/// Save a serializable model as `.apr`.
///
/// # Errors
///
/// Returns an error if serialization or file writing fails.
pub fn save_model<M: Serialize>(
    model: &M,
    path: impl AsRef<Path>,
    name: &str,
    description: &str,
) -> Result<()> {
    let options = SaveOptions::default()
        .with_name(name)
        .with_description(description);
    format::save(model, ModelType::Custom, path, options)
        .map_err(|e| ScorerError::Aprender(e.to_string()))
}

/// Load a model from `.apr`.
///
/// # Errors
///
/// Returns `ArtifactNotFound` for a missing file, or an aprender error if
/// the file cannot be deserialized.
pub fn load_model<M: DeserializeOwned>(path: impl AsRef<Path>) -> Result<M> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ScorerError::ArtifactNotFound {
            path: path.to_path_buf(),
        });
    }
    format::load(path, ModelType::Custom).map_err(|e| ScorerError::Aprender(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
    struct Weights {
        values: Vec<f64>,
        width: usize,
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("weights.apr");
        let original = Weights {
            values: vec![0.25, -1.5, 3.0],
            width: 3,
        };

        save_model(&original, &path, "weights", "test weights").unwrap();
        let loaded: Weights = load_model(&path).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_inspect_records_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("named.apr");
        let weights = Weights {
            values: vec![1.0; 16],
            width: 4,
        };
        save_model(&weights, &path, "touch-ae", "dense autoencoder").unwrap();

        let info = ModelFileInfo::from_path(&path).unwrap();
        assert_eq!(info.model_type(), ModelType::Custom);
        assert_eq!(info.name(), Some("touch-ae"));
        assert_eq!(info.description(), Some("dense autoencoder"));
    }

    #[test]
    fn test_load_missing() {
        let err = load_model::<Weights>("/nonexistent/model.apr").unwrap_err();
        assert!(matches!(err, ScorerError::ArtifactNotFound { .. }));
    }
}
