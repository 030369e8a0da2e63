//! Threshold calibration and score normalization.
//!
//! The threshold is the reconstruction error regarded as baseline normal,
//! derived once at training time as `mean + k * std` of the normal corpus's
//! own errors. Scores are `min(1, mse / threshold)`.

use crate::error::{Result, ScorerError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default standard-deviation multiplier for calibration.
pub const DEFAULT_THRESHOLD_K: f64 = 3.0;

/// Map a reconstruction error onto `[0, 1]`.
///
/// # Errors
///
/// Returns `InvalidThreshold` unless `threshold` is finite and positive.
pub fn normalize(mse: f64, threshold: f64) -> Result<f64> {
    if !(threshold.is_finite() && threshold > 0.0) {
        return Err(ScorerError::InvalidThreshold { value: threshold });
    }
    Ok((mse / threshold).min(1.0))
}

/// Mean and population standard deviation.
#[must_use]
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Validated, immutable threshold. Persisted as `{"threshold": <float>}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ThresholdFile")]
pub struct Threshold {
    threshold: f64,
}

#[derive(Deserialize)]
struct ThresholdFile {
    threshold: f64,
}

impl TryFrom<ThresholdFile> for Threshold {
    type Error = ScorerError;

    fn try_from(file: ThresholdFile) -> Result<Self> {
        Self::new(file.threshold)
    }
}

impl Threshold {
    /// Wrap a threshold value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidThreshold` unless the value is finite and positive.
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && value > 0.0 {
            Ok(Self { threshold: value })
        } else {
            Err(ScorerError::InvalidThreshold { value })
        }
    }

    /// Calibrate from the normal corpus's reconstruction errors.
    ///
    /// # Errors
    ///
    /// Returns `NoData` for an empty error list, `Config` for a negative or
    /// non-finite `k`, and `InvalidThreshold` if the result is not positive.
    pub fn calibrate(errors: &[f64], k: f64) -> Result<Self> {
        if errors.is_empty() {
            return Err(ScorerError::NoData {
                reason: "no reconstruction errors to calibrate on".to_string(),
            });
        }
        if !(k.is_finite() && k >= 0.0) {
            return Err(ScorerError::config(format!(
                "threshold multiplier k must be >= 0, got {k}"
            )));
        }
        let (mean, std) = mean_std(errors);
        Self::new(mean + k * std)
    }

    /// Raw threshold value.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.threshold
    }

    /// Normalize an error against this threshold.
    #[must_use]
    pub fn normalize(&self, mse: f64) -> f64 {
        (mse / self.threshold).min(1.0)
    }

    /// Parse from `threshold.json` contents.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the key is missing or the value invalid.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ScorerError::invalid_format(format!("threshold: {e}")))
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
