//! Training pipeline.
//!
//! Each stage is its own type, so a stage can only be reached from the one
//! before it:
//!
//! ```text
//! Collected ──fit_scaler──▶ ScalerFitted ──fit_model──▶ ModelFitted
//!     ──compute_threshold──▶ Calibrated ──export──▶ ModelBundle on disk
//! ```
//!
//! The threshold is calibrated on the reconstruction errors of the backend
//! that will be shipped, so a compact bundle is calibrated on the quantized
//! graph, not on the dense model it came from.

use crate::backend::{dense::default_hidden_dim, Backend, BackendKind, DenseAutoencoder, FitOptions};
use crate::bundle::ModelBundle;
use crate::error::{Result, ScorerError};
use crate::features::{FeatureCodec, RawRecord};
use crate::report::{training_rng, TrainingReport};
use crate::scaler::Scaler;
use crate::scorer::reconstruction_errors;
use crate::threshold::{mean_std, Threshold, DEFAULT_THRESHOLD_K};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Training settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Backend to ship
    pub backend: BackendKind,
    /// Threshold multiplier on the error standard deviation
    pub threshold_k: f64,
    /// Optimizer settings
    pub fit: FitOptions,
    /// Hidden width; `max(8, n/2)` when unset
    pub hidden_dim: Option<usize>,
    /// RNG seed; a fixed name-derived seed when unset
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Dense,
            threshold_k: DEFAULT_THRESHOLD_K,
            fit: FitOptions::default(),
            hidden_dim: None,
            seed: None,
        }
    }
}

impl TrainingConfig {
    /// Check the settings before any work is done.
    ///
    /// # Errors
    ///
    /// Returns `Config` for a negative `k`, zero epochs, zero batch size,
    /// a non-positive learning rate or a zero hidden width.
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold_k.is_finite() && self.threshold_k >= 0.0) {
            return Err(ScorerError::config(format!(
                "threshold_k must be >= 0, got {}",
                self.threshold_k
            )));
        }
        if self.fit.epochs == 0 {
            return Err(ScorerError::config("epochs must be at least 1"));
        }
        if self.fit.batch_size == 0 {
            return Err(ScorerError::config("batch_size must be at least 1"));
        }
        if !(self.fit.learning_rate.is_finite() && self.fit.learning_rate > 0.0) {
            return Err(ScorerError::config(format!(
                "learning_rate must be > 0, got {}",
                self.fit.learning_rate
            )));
        }
        if self.hidden_dim == Some(0) {
            return Err(ScorerError::config("hidden_dim must be at least 1"));
        }
        Ok(())
    }
}

/// Pipeline stage names, for logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingStage {
    /// Gather and encode normal records
    Collect,
    /// Fit the standardizer
    FitScaler,
    /// Fit the backend
    FitModel,
    /// Derive the threshold
    ComputeThreshold,
    /// Write the bundle
    Export,
}

impl fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Collect => "COLLECT",
            Self::FitScaler => "FIT_SCALER",
            Self::FitModel => "FIT_MODEL",
            Self::ComputeThreshold => "COMPUTE_THRESHOLD",
            Self::Export => "EXPORT",
        })
    }
}

/// Encoded normal-data corpus.
#[derive(Debug, Clone)]
pub struct Collected {
    codec: FeatureCodec,
    rows: Vec<Vec<f64>>,
    unknown_labels: BTreeSet<String>,
    dropped: usize,
    report: TrainingReport,
}

impl Collected {
    /// Encode every record whose label is in the map; others are dropped.
    ///
    /// # Errors
    ///
    /// Returns `NoData` if no record survives.
    pub fn collect<'a, I>(codec: FeatureCodec, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a RawRecord>,
    {
        let report = TrainingReport::new();
        let mut rows = Vec::new();
        let mut unknown_labels = BTreeSet::new();
        let mut dropped = 0;

        for record in records {
            match codec.encode(record) {
                Ok(features) => rows.push(features.to_vec()),
                Err(_) => {
                    unknown_labels.insert(record.label.clone());
                    dropped += 1;
                }
            }
        }

        if !unknown_labels.is_empty() {
            warn!(dropped, labels = ?unknown_labels, "dropped records with unknown labels");
        }
        if rows.is_empty() {
            return Err(ScorerError::NoData {
                reason: format!(
                    "no records with a known label (known: {})",
                    codec.map().labels().collect::<Vec<_>>().join(", ")
                ),
            });
        }
        info!(stage = %TrainingStage::Collect, rows = rows.len(), dropped, "collected training corpus");

        Ok(Self {
            codec,
            rows,
            unknown_labels,
            dropped,
            report,
        })
    }

    /// Count rows the caller skipped before collection (e.g. malformed CSV).
    #[must_use]
    pub fn with_skipped(mut self, skipped: usize) -> Self {
        self.dropped += skipped;
        self
    }

    /// Encoded rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Labels that were dropped.
    #[must_use]
    pub fn unknown_labels(&self) -> &BTreeSet<String> {
        &self.unknown_labels
    }

    /// Rows dropped so far.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Fit the standardizer over every collected row.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows are ragged.
    pub fn fit_scaler(self) -> Result<ScalerFitted> {
        let scaler = Scaler::fit(&self.rows)?;
        let standardized = scaler.apply_batch(&self.rows)?;
        debug!(stage = %TrainingStage::FitScaler, mean = ?scaler.mean(), scale = ?scaler.scale(), "fitted scaler");
        Ok(ScalerFitted {
            codec: self.codec,
            scaler,
            standardized,
            dropped: self.dropped,
            report: self.report,
        })
    }
}

/// Corpus with a fitted standardizer.
#[derive(Debug, Clone)]
pub struct ScalerFitted {
    codec: FeatureCodec,
    scaler: Scaler,
    standardized: Vec<Vec<f64>>,
    dropped: usize,
    report: TrainingReport,
}

impl ScalerFitted {
    /// The fitted standardizer.
    #[must_use]
    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    /// Standardized rows.
    #[must_use]
    pub fn standardized(&self) -> &[Vec<f64>] {
        &self.standardized
    }

    /// Train a dense autoencoder on the standardized rows and compile it to
    /// the configured backend.
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid settings, or an error from fitting.
    pub fn fit_model(self, config: &TrainingConfig) -> Result<ModelFitted> {
        config.validate()?;
        let n = self.scaler.dim();
        let hidden = config.hidden_dim.unwrap_or_else(|| default_hidden_dim(n));
        let mut rng = training_rng(config.seed);

        let mut model = DenseAutoencoder::new(n, hidden, &mut rng);
        let losses = model.fit(&self.standardized, &config.fit, &mut rng)?;
        let final_loss = losses.last().copied().unwrap_or(f64::NAN);
        info!(
            stage = %TrainingStage::FitModel,
            input_dim = n,
            hidden_dim = hidden,
            epochs = config.fit.epochs,
            final_loss,
            "fitted autoencoder"
        );

        let backend = Backend::compile(model, config.backend);
        let mut report = self.report;
        report.record_string_metric("backend", config.backend.as_str());
        report.record_count("hidden_dim", hidden);
        report.record_float_metric("final_loss", final_loss);

        Ok(ModelFitted {
            codec: self.codec,
            scaler: self.scaler,
            standardized: self.standardized,
            backend,
            dropped: self.dropped,
            report,
        })
    }
}

/// Corpus with a fitted standardizer and backend.
#[derive(Debug, Clone)]
pub struct ModelFitted {
    codec: FeatureCodec,
    scaler: Scaler,
    standardized: Vec<Vec<f64>>,
    backend: Backend,
    dropped: usize,
    report: TrainingReport,
}

impl ModelFitted {
    /// The fitted backend.
    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Derive the threshold as `mean + k * std` of the corpus's own errors.
    ///
    /// # Errors
    ///
    /// Returns `InvalidThreshold` if the result is not positive, or an error
    /// from the backend.
    pub fn compute_threshold(self, k: f64) -> Result<Calibrated> {
        let errors = reconstruction_errors(&self.backend, &self.standardized)?;
        let threshold = Threshold::calibrate(&errors, k)?;
        let (error_mean, error_std) = mean_std(&errors);
        info!(
            stage = %TrainingStage::ComputeThreshold,
            threshold = threshold.value(),
            error_mean,
            error_std,
            k,
            "calibrated threshold"
        );

        let mut report = self.report;
        report.record_count("n", self.scaler.dim());
        report.record_float_metric("threshold", threshold.value());
        report.record_count("train_samples", self.standardized.len());
        report.record_count("dropped_rows", self.dropped);
        report.record_float_metric("error_mean", error_mean);
        report.record_float_metric("error_std", error_std);
        report.record_float_metric("threshold_k", k);

        let bundle = ModelBundle::from_parts(self.codec, self.scaler, threshold, self.backend)?;
        Ok(Calibrated { bundle, report })
    }
}

/// A complete bundle ready to be written.
#[derive(Debug, Clone)]
pub struct Calibrated {
    bundle: ModelBundle,
    report: TrainingReport,
}

impl Calibrated {
    /// The assembled bundle.
    #[must_use]
    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    /// Metrics gathered so far.
    #[must_use]
    pub fn report(&self) -> &TrainingReport {
        &self.report
    }

    /// Write the bundle, including `report.txt`, to `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if any artifact cannot be written.
    pub fn export(self, dir: impl AsRef<Path>) -> Result<(ModelBundle, TrainingReport)> {
        let dir = dir.as_ref();
        let mut bundle = self.bundle;
        let mut report = self.report;
        report.record_duration("duration", report.elapsed());

        let manifest = bundle.export(dir, Some(&report.render()))?;
        info!(
            stage = %TrainingStage::Export,
            dir = %dir.display(),
            bundle_id = %manifest.bundle_id,
            "exported bundle"
        );
        Ok((bundle, report))
    }
}

/// Run every stage up to calibration.
///
/// # Errors
///
/// Returns the first stage's error, e.g. `NoData` for a corpus with no known
/// labels.
pub fn train<'a, I>(codec: FeatureCodec, records: I, config: &TrainingConfig) -> Result<Calibrated>
where
    I: IntoIterator<Item = &'a RawRecord>,
{
    config.validate()?;
    Collected::collect(codec, records)?
        .fit_scaler()?
        .fit_model(config)?
        .compute_threshold(config.threshold_k)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::backend::Reconstruct;
    use crate::bundle::REPORT_FILE;
    use crate::features::FEATURE_DIM;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn corpus(n: usize) -> Vec<RawRecord> {
        let mut rng = StdRng::seed_from_u64(11);
        (0..n)
            .map(|i| {
                let label = if i % 2 == 0 { "TAP" } else { "SWIPE" };
                let mut m = [0.0; 9];
                for v in &mut m {
                    *v = rng.gen_range(0.0..1.0);
                }
                m[0] = 100.0 + rng.gen_range(0.0..50.0);
                RawRecord::new(label, m)
            })
            .collect()
    }

    fn quick() -> TrainingConfig {
        TrainingConfig {
            fit: FitOptions {
                epochs: 3,
                batch_size: 16,
                learning_rate: 1e-2,
            },
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_collect_drops_unknown_labels() {
        let mut records = corpus(4);
        records.push(RawRecord::new("PINCH", [1.0; 9]));
        let collected = Collected::collect(FeatureCodec::default(), &records).unwrap();
        assert_eq!(collected.rows().len(), 4);
        assert_eq!(collected.dropped(), 1);
        assert!(collected.unknown_labels().contains("PINCH"));
    }

    #[test]
    fn test_collect_empty_is_no_data() {
        let records = vec![RawRecord::new("PINCH", [1.0; 9])];
        let err = Collected::collect(FeatureCodec::default(), &records).unwrap_err();
        assert!(matches!(err, ScorerError::NoData { .. }));
    }

    #[test]
    fn test_fit_scaler_standardizes() {
        let records = corpus(50);
        let fitted = Collected::collect(FeatureCodec::default(), &records)
            .unwrap()
            .fit_scaler()
            .unwrap();
        assert_eq!(fitted.scaler().dim(), FEATURE_DIM);
        let first_col: Vec<f64> = fitted.standardized().iter().map(|r| r[1]).collect();
        let (mean, std) = mean_std(&first_col);
        assert!(mean.abs() < 1e-9);
        assert!((std - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_matches_formula() {
        let records = corpus(64);
        let scaled = Collected::collect(FeatureCodec::default(), &records)
            .unwrap()
            .fit_scaler()
            .unwrap();
        let standardized = scaled.standardized().to_vec();
        let fitted = scaled.fit_model(&quick()).unwrap();
        let errors = reconstruction_errors(fitted.backend(), &standardized).unwrap();
        let (mean, std) = mean_std(&errors);

        let calibrated = fitted.compute_threshold(2.0).unwrap();
        let expected = mean + 2.0 * std;
        assert!((calibrated.bundle().threshold().value() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_training_is_deterministic() {
        let records = corpus(40);
        let a = train(FeatureCodec::default(), &records, &quick()).unwrap();
        let b = train(FeatureCodec::default(), &records, &quick()).unwrap();
        assert_eq!(a.bundle().backend(), b.bundle().backend());
        assert_eq!(a.bundle().threshold(), b.bundle().threshold());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let records = corpus(8);
        let config = TrainingConfig {
            threshold_k: -1.0,
            ..quick()
        };
        let err = train(FeatureCodec::default(), &records, &config).unwrap_err();
        assert!(matches!(err, ScorerError::Config { .. }));
    }

    #[test]
    fn test_compact_export_writes_report() {
        let dir = tempdir().unwrap();
        let records = corpus(32);
        let config = TrainingConfig {
            backend: BackendKind::Compact,
            ..quick()
        };
        let (bundle, report) = train(FeatureCodec::default(), &records, &config)
            .unwrap()
            .export(dir.path())
            .unwrap();

        assert_eq!(bundle.backend().kind(), BackendKind::Compact);
        assert_eq!(bundle.backend().input_dim(), FEATURE_DIM);
        let text = std::fs::read_to_string(dir.path().join(REPORT_FILE)).unwrap();
        assert!(text.starts_with("backend=compact\n"));
        assert!(text.contains("n=10\n"));
        assert!(text.contains("train_samples=32\n"));
        assert!(report.get_metric("duration").is_some());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(TrainingStage::ComputeThreshold.to_string(), "COMPUTE_THRESHOLD");
    }
}
