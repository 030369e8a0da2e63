//! Reconstruction backends.
//!
//! Every backend maps a standardized vector to a reconstruction of the same
//! width. The two shipped variants are selected once, when a bundle is
//! loaded; callers hold a [`Backend`] and never branch on which one it is.
//!
//! | Variant   | Artifact     | Weights | Notes                        |
//! |-----------|--------------|---------|------------------------------|
//! | `Dense`   | `model.apr`  | f64     | trained model, single pass   |
//! | `Compact` | `model.taeg` | int8    | resizable batch, 128-row chunks |

pub mod compact;
pub mod dense;

use crate::error::{Result, ScorerError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

pub use compact::CompactGraph;
pub use dense::{DenseAutoencoder, FitOptions};

/// Standardized vector in, reconstruction out.
pub trait Reconstruct {
    /// Feature width the backend accepts.
    fn input_dim(&self) -> usize;

    /// Feature width the backend produces.
    fn output_dim(&self) -> usize;

    /// Reconstruct every row.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` for rows of the wrong width and
    /// `ShapeMismatch` if the backend does not reconstruct its input width.
    fn reconstruct_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>>;

    /// Reconstruct a single row.
    ///
    /// # Errors
    ///
    /// Same as [`Reconstruct::reconstruct_batch`].
    fn reconstruct(&self, row: &[f64]) -> Result<Vec<f64>> {
        self.reconstruct_batch(&[row.to_vec()])?
            .pop()
            .ok_or_else(|| ScorerError::shape_mismatch((1, row.len()), (0, self.output_dim())))
    }
}

/// Which backend a bundle carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Full-precision regression model
    Dense,
    /// Size-constrained quantized graph
    Compact,
}

impl BackendKind {
    /// Artifact file name inside a bundle directory.
    #[must_use]
    pub fn artifact_file_name(&self) -> &'static str {
        match self {
            Self::Dense => "model.apr",
            Self::Compact => "model.taeg",
        }
    }

    /// Lowercase name used in manifests and on the command line.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Compact => "compact",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ScorerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dense" | "full" | "sklearn" => Ok(Self::Dense),
            "compact" | "embedded" => Ok(Self::Compact),
            other => Err(ScorerError::backend_unavailable(
                other,
                "not built into this binary (supported: dense, compact)",
            )),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loaded backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    /// Full-precision model
    Dense(DenseAutoencoder),
    /// Quantized graph
    Compact(CompactGraph),
}

impl Backend {
    /// Turn a trained dense model into the requested backend.
    #[must_use]
    pub fn compile(model: DenseAutoencoder, kind: BackendKind) -> Self {
        match kind {
            BackendKind::Dense => Self::Dense(model),
            BackendKind::Compact => Self::Compact(CompactGraph::from_dense(&model)),
        }
    }

    /// Variant tag.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Dense(_) => BackendKind::Dense,
            Self::Compact(_) => BackendKind::Compact,
        }
    }

    /// Stored parameter count.
    #[must_use]
    pub fn num_params(&self) -> usize {
        match self {
            Self::Dense(m) => m.num_params(),
            Self::Compact(g) => g.num_params(),
        }
    }

    /// Load the artifact for `kind` from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact is missing or invalid.
    pub fn load(kind: BackendKind, path: impl AsRef<Path>) -> Result<Self> {
        match kind {
            BackendKind::Dense => DenseAutoencoder::load(path).map(Self::Dense),
            BackendKind::Compact => CompactGraph::load(path).map(Self::Compact),
        }
    }

    /// Write the artifact to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        match self {
            Self::Dense(m) => m.save(path),
            Self::Compact(g) => g.save(path),
        }
    }

    /// Set the compact backend's chunk size; no effect on `Dense`.
    #[must_use]
    pub fn with_batch_rows(self, rows: usize) -> Self {
        match self {
            Self::Compact(g) => Self::Compact(g.with_batch_rows(rows)),
            dense => dense,
        }
    }
}

impl Reconstruct for Backend {
    fn input_dim(&self) -> usize {
        match self {
            Self::Dense(m) => m.input_dim(),
            Self::Compact(g) => g.input_dim(),
        }
    }

    fn output_dim(&self) -> usize {
        match self {
            Self::Dense(m) => m.output_dim(),
            Self::Compact(g) => g.output_dim(),
        }
    }

    fn reconstruct_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        match self {
            Self::Dense(m) => m.reconstruct_batch(rows),
            Self::Compact(g) => g.reconstruct_batch(rows),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("dense".parse::<BackendKind>().unwrap(), BackendKind::Dense);
        assert_eq!("COMPACT".parse::<BackendKind>().unwrap(), BackendKind::Compact);
        let err = "tflite".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, ScorerError::BackendUnavailable { .. }));
        assert!(err.to_string().contains("tflite"));
    }

    #[test]
    fn test_backend_kind_serde() {
        let json = serde_json::to_string(&BackendKind::Compact).unwrap();
        assert_eq!(json, "\"compact\"");
        assert_eq!(BackendKind::Dense.artifact_file_name(), "model.apr");
        assert_eq!(format!("{}", BackendKind::Compact), "compact");
    }

    #[test]
    fn test_compile_selects_variant() {
        let mut rng = StdRng::seed_from_u64(5);
        let dense = DenseAutoencoder::new(10, 8, &mut rng);
        let compact = Backend::compile(dense.clone(), BackendKind::Compact);
        assert_eq!(compact.kind(), BackendKind::Compact);
        assert_eq!(compact.input_dim(), 10);
        assert_eq!(compact.output_dim(), 10);

        let full = Backend::compile(dense, BackendKind::Dense);
        assert_eq!(full.kind(), BackendKind::Dense);
        assert_eq!(full.reconstruct(&[0.0; 10]).unwrap().len(), 10);
    }

    #[test]
    fn test_save_load_each_kind() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let dense = DenseAutoencoder::new(10, 8, &mut rng);
        for kind in [BackendKind::Dense, BackendKind::Compact] {
            let backend = Backend::compile(dense.clone(), kind);
            let path = dir.path().join(kind.artifact_file_name());
            backend.save(&path).unwrap();
            assert_eq!(Backend::load(kind, &path).unwrap(), backend);
        }
    }
}
