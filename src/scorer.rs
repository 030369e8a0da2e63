//! Reconstruction error and score records.
//!
//! `mse = mean over dims of (standardized[i] - reconstructed[i])^2`, computed
//! the same way for every backend.

use crate::backend::Reconstruct;
use crate::error::{Result, ScorerError};
use serde::{Deserialize, Serialize};

/// Mean squared difference between a vector and its reconstruction.
///
/// # Errors
///
/// Returns `ShapeMismatch` if the widths differ.
pub fn reconstruction_error(original: &[f64], reconstructed: &[f64]) -> Result<f64> {
    if original.len() != reconstructed.len() {
        return Err(ScorerError::shape_mismatch(
            (1, original.len()),
            (1, reconstructed.len()),
        ));
    }
    if original.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = original
        .iter()
        .zip(reconstructed)
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    Ok(sum / original.len() as f64)
}

/// Mean squared difference over the dimensions flagged in `present`.
///
/// Returns 0 when no dimension is present.
///
/// # Errors
///
/// Returns `ShapeMismatch` if the three slices differ in width.
pub fn masked_reconstruction_error(
    original: &[f64],
    reconstructed: &[f64],
    present: &[bool],
) -> Result<f64> {
    if original.len() != reconstructed.len() || original.len() != present.len() {
        return Err(ScorerError::shape_mismatch(
            (1, original.len()),
            (1, reconstructed.len()),
        ));
    }
    let (sum, count) = original
        .iter()
        .zip(reconstructed)
        .zip(present)
        .filter(|(_, keep)| **keep)
        .fold((0.0, 0usize), |(sum, count), ((a, b), _)| {
            (sum + (a - b) * (a - b), count + 1)
        });
    Ok(if count == 0 { 0.0 } else { sum / count as f64 })
}

/// Per-row reconstruction errors for already standardized rows.
///
/// # Errors
///
/// Returns `ShapeMismatch` if the backend returns a different number of rows
/// or a different width than it was given.
pub fn reconstruction_errors<R: Reconstruct + ?Sized>(
    backend: &R,
    standardized: &[Vec<f64>],
) -> Result<Vec<f64>> {
    let width = standardized.first().map_or(0, Vec::len);
    let reconstructed = backend.reconstruct_batch(standardized)?;
    if reconstructed.len() != standardized.len() {
        return Err(ScorerError::shape_mismatch(
            (standardized.len(), width),
            (reconstructed.len(), reconstructed.first().map_or(0, Vec::len)),
        ));
    }
    standardized
        .iter()
        .zip(&reconstructed)
        .map(|(x, y)| {
            if x.len() == y.len() {
                reconstruction_error(x, y)
            } else {
                Err(ScorerError::shape_mismatch(
                    (standardized.len(), x.len()),
                    (reconstructed.len(), y.len()),
                ))
            }
        })
        .collect()
}

/// Result of scoring one record, as emitted by the batch driver and the
/// scoring service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Whether the record was scored
    pub ok: bool,
    /// Reconstruction error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mse: Option<f64>,
    /// Threshold the score was normalized against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Anomaly score in `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScoreRecord {
    /// Successful score.
    ///
    /// An infinite error is clamped to `f64::MAX` so it serializes as a
    /// number; a NaN error yields a failed record.
    #[must_use]
    pub fn scored(mse: f64, threshold: f64, score: f64) -> Self {
        if mse.is_nan() || score.is_nan() {
            return Self::failed("reconstruction error is not a number");
        }
        let mse = mse.min(f64::MAX);
        Self {
            ok: true,
            mse: Some(mse),
            threshold: Some(threshold),
            score: Some(score),
            error: None,
        }
    }

    /// Failed record.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            mse: None,
            threshold: None,
            score: None,
            error: Some(error.into()),
        }
    }
}
