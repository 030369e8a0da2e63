//! Per-feature standardization: `z = (x - mean) / scale`.
//!
//! Fitted once on the normal corpus and persisted as `scaler.json`:
//!
//! ```json
//! {"mean": [..N floats..], "scale": [..N floats..]}
//! ```
//!
//! A zero scale entry is treated as 1 so a constant feature standardizes to 0
//! instead of dividing by zero.

use crate::error::{Result, ScorerError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Fitted mean and scale, one entry per feature dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScalerFile")]
pub struct Scaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

/// Unvalidated on-disk shape.
#[derive(Deserialize)]
struct ScalerFile {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl TryFrom<ScalerFile> for Scaler {
    type Error = ScorerError;

    fn try_from(file: ScalerFile) -> Result<Self> {
        Self::new(file.mean, file.scale)
    }
}

impl Scaler {
    /// Create a scaler from parallel mean and scale vectors.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the lengths differ and `InvalidFormat`
    /// if either is empty or holds non-finite values.
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self> {
        if mean.len() != scale.len() {
            return Err(ScorerError::DimensionMismatch {
                expected: mean.len(),
                actual: scale.len(),
            });
        }
        if mean.is_empty() {
            return Err(ScorerError::invalid_format("scaler has zero dimensions"));
        }
        if mean.iter().chain(&scale).any(|v| !v.is_finite()) {
            return Err(ScorerError::invalid_format("scaler holds non-finite values"));
        }

        let scale = scale
            .into_iter()
            .map(|s| if s == 0.0 { 1.0 } else { s })
            .collect();
        Ok(Self { mean, scale })
    }

    /// Scaler that leaves vectors unchanged.
    #[must_use]
    pub fn identity(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            scale: vec![1.0; dim],
        }
    }

    /// Fit per-column mean and population standard deviation.
    ///
    /// # Errors
    ///
    /// Returns `NoData` for an empty matrix and `DimensionMismatch` for
    /// ragged rows.
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(ScorerError::NoData {
                reason: "cannot fit a scaler on zero rows".to_string(),
            });
        };
        let dim = first.len();
        if let Some(row) = rows.iter().find(|r| r.len() != dim) {
            return Err(ScorerError::DimensionMismatch {
                expected: dim,
                actual: row.len(),
            });
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0; dim];
        for row in rows {
            for (m, x) in mean.iter_mut().zip(row) {
                *m += x;
            }
        }
        for m in &mut mean {
            *m /= n;
        }
        // Constant columns keep their exact value so they standardize to 0.
        for (j, m) in mean.iter_mut().enumerate() {
            if rows.iter().all(|r| r[j] == first[j]) {
                *m = first[j];
            }
        }

        let mut var = vec![0.0; dim];
        for row in rows {
            for ((v, x), m) in var.iter_mut().zip(row).zip(&mean) {
                *v += (x - m) * (x - m);
            }
        }
        let scale = var.into_iter().map(|v| (v / n).sqrt()).collect();

        Self::new(mean, scale)
    }

    /// Number of feature dimensions.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Per-feature means.
    #[must_use]
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Per-feature scales (zeros already replaced by 1).
    #[must_use]
    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    fn check_dim(&self, len: usize) -> Result<()> {
        if len == self.dim() {
            Ok(())
        } else {
            Err(ScorerError::DimensionMismatch {
                expected: self.dim(),
                actual: len,
            })
        }
    }

    /// Standardize one vector.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if `x` has the wrong width.
    pub fn apply(&self, x: &[f64]) -> Result<Vec<f64>> {
        self.check_dim(x.len())?;
        Ok(x.iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((x, m), s)| (x - m) / s)
            .collect())
    }

    /// Standardize every row of a matrix.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` on the first row with the wrong width.
    pub fn apply_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        rows.iter().map(|row| self.apply(row)).collect()
    }

    /// Standardize a single feature value.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if `index` is out of range.
    pub fn apply_at(&self, index: usize, x: f64) -> Result<f64> {
        if index >= self.dim() {
            return Err(ScorerError::DimensionMismatch {
                expected: self.dim(),
                actual: index + 1,
            });
        }
        Ok((x - self.mean[index]) / self.scale[index])
    }

    /// Undo standardization: `x = mean + z * scale`.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if `z` has the wrong width.
    pub fn invert(&self, z: &[f64]) -> Result<Vec<f64>> {
        self.check_dim(z.len())?;
        Ok(z.iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((z, m), s)| m + z * s)
            .collect())
    }

    /// Parse from `scaler.json` contents.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ScorerError::invalid_format(format!("scaler: {e}")))
    }

    /// Load from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScorerError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Save to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}
