//! Versioned model bundles.
//!
//! A bundle is a directory holding the artifacts that must be used together:
//!
//! ```text
//! bundle/
//! ├── bundle.json        manifest: backend, feature layout, BLAKE3 digests
//! ├── scaler.json
//! ├── threshold.json
//! ├── gesture_map.json
//! ├── model.apr | model.taeg
//! └── report.txt         (written by training, optional)
//! ```
//!
//! Loading re-hashes every artifact listed in the manifest, so replacing one
//! file without re-exporting the others is rejected with `BundleMismatch`.
//! Dimensions are validated eagerly at load and export, never at scoring
//! time.
//!
//! # Example
//!
//! ```no_run
//! use touch_scorer::bundle::ModelBundle;
//! use touch_scorer::features::RawRecord;
//!
//! fn main() -> touch_scorer::Result<()> {
//!     let bundle = ModelBundle::load("artifacts/touch")?;
//!     let record = RawRecord::new("TAP", [80.0, 2.1, 0.03, 0.05, 0.4, 0.6, 0.01, 0.0, 0.02]);
//!     let scored = bundle.score_record(&record)?;
//!     println!("score: {:?}", scored.score);
//!     Ok(())
//! }
//! ```

use crate::backend::{Backend, BackendKind, Reconstruct};
use crate::error::{Result, ScorerError};
use crate::features::{FeatureCodec, FeatureVector, GestureMap, RawRecord, FEATURE_DIM, FEATURE_NAMES};
use crate::scaler::Scaler;
use crate::scorer::{masked_reconstruction_error, reconstruction_errors, ScoreRecord};
use crate::threshold::Threshold;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Manifest file name.
pub const MANIFEST_FILE: &str = "bundle.json";
/// Scaler artifact file name.
pub const SCALER_FILE: &str = "scaler.json";
/// Threshold artifact file name.
pub const THRESHOLD_FILE: &str = "threshold.json";
/// Label map artifact file name.
pub const GESTURE_MAP_FILE: &str = "gesture_map.json";
/// Training report file name.
pub const REPORT_FILE: &str = "report.txt";

/// Manifest layout version.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// What an artifact is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    /// Standardizer parameters
    Scaler,
    /// Calibrated threshold
    Threshold,
    /// Gesture label map
    GestureMap,
    /// Backend model
    Model,
    /// Training report
    Report,
}

impl ArtifactRole {
    const REQUIRED: [Self; 4] = [Self::Scaler, Self::Threshold, Self::GestureMap, Self::Model];
}

/// File name and digest of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDigest {
    /// Role within the bundle
    pub role: ArtifactRole,
    /// File name relative to the bundle directory
    pub file: String,
    /// Hex BLAKE3 digest of the file contents
    pub blake3: String,
}

/// Contents of `bundle.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Manifest layout version
    pub format_version: u32,
    /// Identifier derived from every artifact digest
    pub bundle_id: String,
    /// Backend name; parsed at load so unknown backends fail there
    pub backend: String,
    /// Feature vector width
    pub feature_dim: usize,
    /// Feature names in vector order
    pub feature_names: Vec<String>,
    /// Digest of every artifact
    pub artifacts: Vec<ArtifactDigest>,
    /// Tool that wrote the bundle
    pub producer: String,
}

impl BundleManifest {
    /// Hash the artifacts already present in `dir` and write `bundle.json`.
    ///
    /// The report is listed only if the file exists.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactNotFound` if a required artifact is missing.
    pub fn seal(dir: impl AsRef<Path>, backend: BackendKind) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files = vec![
            (ArtifactRole::Scaler, SCALER_FILE),
            (ArtifactRole::Threshold, THRESHOLD_FILE),
            (ArtifactRole::GestureMap, GESTURE_MAP_FILE),
            (ArtifactRole::Model, backend.artifact_file_name()),
        ];
        if dir.join(REPORT_FILE).exists() {
            files.push((ArtifactRole::Report, REPORT_FILE));
        }

        let artifacts = files
            .into_iter()
            .map(|(role, file)| {
                Ok(ArtifactDigest {
                    role,
                    file: file.to_string(),
                    blake3: digest_file(&dir.join(file))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let manifest = Self {
            format_version: BUNDLE_FORMAT_VERSION,
            bundle_id: bundle_id(&artifacts),
            backend: backend.as_str().to_string(),
            feature_dim: FEATURE_DIM,
            feature_names: FEATURE_NAMES.iter().map(ToString::to_string).collect(),
            artifacts,
            producer: format!("touch-scorer {}", env!("CARGO_PKG_VERSION")),
        };
        std::fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        Ok(manifest)
    }

    /// Read `bundle.json` from a bundle directory.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactNotFound` if the manifest is missing and
    /// `InvalidFormat` if it cannot be parsed or has an unknown version.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(MANIFEST_FILE);
        if !path.exists() {
            return Err(ScorerError::ArtifactNotFound { path });
        }
        let manifest: Self = serde_json::from_str(&std::fs::read_to_string(&path)?)
            .map_err(|e| ScorerError::invalid_format(format!("manifest: {e}")))?;
        if manifest.format_version != BUNDLE_FORMAT_VERSION {
            return Err(ScorerError::invalid_format(format!(
                "unsupported bundle format version {}",
                manifest.format_version
            )));
        }
        Ok(manifest)
    }

    /// Parsed backend kind.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` for a backend this binary cannot run.
    pub fn backend_kind(&self) -> Result<BackendKind> {
        self.backend.parse()
    }

    /// Artifact entry for a role.
    #[must_use]
    pub fn artifact(&self, role: ArtifactRole) -> Option<&ArtifactDigest> {
        self.artifacts.iter().find(|a| a.role == role)
    }

    /// Re-hash every listed artifact and compare with the manifest.
    ///
    /// # Errors
    ///
    /// Returns `BundleMismatch` if a required artifact is not listed, or a
    /// digest differs, and `ArtifactNotFound` if a listed file is missing.
    pub fn verify(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        for role in ArtifactRole::REQUIRED {
            if self.artifact(role).is_none() {
                return Err(ScorerError::bundle_mismatch(format!(
                    "manifest lists no {role:?} artifact"
                )));
            }
        }
        if self.feature_dim != FEATURE_DIM {
            return Err(ScorerError::DimensionMismatch {
                expected: FEATURE_DIM,
                actual: self.feature_dim,
            });
        }
        if self.feature_names.iter().map(String::as_str).ne(FEATURE_NAMES) {
            return Err(ScorerError::bundle_mismatch(format!(
                "feature order differs: {:?}",
                self.feature_names
            )));
        }
        for artifact in &self.artifacts {
            let actual = digest_file(&dir.join(&artifact.file))?;
            if actual != artifact.blake3 {
                return Err(ScorerError::bundle_mismatch(format!(
                    "{} was replaced after export (digest {} != {})",
                    artifact.file,
                    short(&actual),
                    short(&artifact.blake3)
                )));
            }
        }
        Ok(())
    }
}

/// Options applied when loading a bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Chunk size for the compact backend
    pub batch_rows: Option<usize>,
}

/// Label map, scaler, threshold and backend that belong together.
#[derive(Debug, Clone)]
pub struct ModelBundle<R = Backend> {
    codec: FeatureCodec,
    scaler: Scaler,
    threshold: Threshold,
    backend: R,
    manifest: Option<BundleManifest>,
}

impl<R: Reconstruct> ModelBundle<R> {
    /// Assemble a bundle, validating that every part agrees on width.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the scaler or backend input width is
    /// not the feature width, and `ShapeMismatch` if the backend does not
    /// reconstruct its full input width.
    pub fn from_parts(
        codec: FeatureCodec,
        scaler: Scaler,
        threshold: Threshold,
        backend: R,
    ) -> Result<Self> {
        if scaler.dim() != FEATURE_DIM {
            return Err(ScorerError::DimensionMismatch {
                expected: FEATURE_DIM,
                actual: scaler.dim(),
            });
        }
        if backend.input_dim() != scaler.dim() {
            return Err(ScorerError::DimensionMismatch {
                expected: scaler.dim(),
                actual: backend.input_dim(),
            });
        }
        if backend.output_dim() != backend.input_dim() {
            return Err(ScorerError::shape_mismatch(
                (1, backend.input_dim()),
                (1, backend.output_dim()),
            ));
        }
        Ok(Self {
            codec,
            scaler,
            threshold,
            backend,
            manifest: None,
        })
    }

    /// Feature codec.
    #[must_use]
    pub fn codec(&self) -> &FeatureCodec {
        &self.codec
    }

    /// Standardizer.
    #[must_use]
    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    /// Calibrated threshold.
    #[must_use]
    pub fn threshold(&self) -> &Threshold {
        &self.threshold
    }

    /// Backend.
    #[must_use]
    pub fn backend(&self) -> &R {
        &self.backend
    }

    /// Manifest, if the bundle was loaded from or exported to disk.
    #[must_use]
    pub fn manifest(&self) -> Option<&BundleManifest> {
        self.manifest.as_ref()
    }

    /// Score encoded feature vectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn score_features(&self, rows: &[FeatureVector]) -> Result<Vec<ScoreRecord>> {
        let raw: Vec<Vec<f64>> = rows.iter().map(FeatureVector::to_vec).collect();
        let standardized = self.scaler.apply_batch(&raw)?;
        let errors = reconstruction_errors(&self.backend, &standardized)?;
        Ok(errors.into_iter().map(|mse| self.to_record(mse)).collect())
    }

    /// Encode and score a single raw record.
    ///
    /// # Errors
    ///
    /// Returns `UnknownLabel` if the label is not in the map.
    pub fn score_record(&self, record: &RawRecord) -> Result<ScoreRecord> {
        let features = self.codec.encode(record)?;
        self.score_features(&[features])?
            .pop()
            .ok_or_else(|| ScorerError::shape_mismatch((1, FEATURE_DIM), (0, FEATURE_DIM)))
    }

    /// Score a vector where only some features are known.
    ///
    /// Known values are standardized and unknown ones are placed at the
    /// scaler mean. The error is averaged over the known dimensions only,
    /// and a vector with nothing known scores 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn score_partial(&self, values: &[Option<f64>; FEATURE_DIM]) -> Result<ScoreRecord> {
        let present: Vec<bool> = values.iter().map(Option::is_some).collect();
        if !present.iter().any(|p| *p) {
            return Ok(self.to_record(0.0));
        }

        let standardized = values
            .iter()
            .enumerate()
            .map(|(i, v)| v.map_or(Ok(0.0), |x| self.scaler.apply_at(i, x)))
            .collect::<Result<Vec<f64>>>()?;
        let reconstructed = self.backend.reconstruct(&standardized)?;
        let mse = masked_reconstruction_error(&standardized, &reconstructed, &present)?;
        Ok(self.to_record(mse))
    }

    fn to_record(&self, mse: f64) -> ScoreRecord {
        ScoreRecord::scored(mse, self.threshold.value(), self.threshold.normalize(mse))
    }
}

impl ModelBundle<Backend> {
    /// Load and verify a bundle directory.
    ///
    /// # Errors
    ///
    /// See [`ModelBundle::load_with`].
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(dir, &LoadOptions::default())
    }

    /// Load and verify a bundle directory with options.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactNotFound` for missing files, `BundleMismatch` if an
    /// artifact does not match the manifest, `BackendUnavailable` for an
    /// unsupported backend, and `DimensionMismatch`/`ShapeMismatch` if the
    /// artifacts disagree on width.
    pub fn load_with(dir: impl AsRef<Path>, options: &LoadOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest = BundleManifest::load(dir)?;
        let kind = manifest.backend_kind()?;
        manifest.verify(dir)?;

        let file = |role| {
            manifest
                .artifact(role)
                .map(|a| dir.join(&a.file))
                .ok_or_else(|| ScorerError::bundle_mismatch(format!("manifest lists no {role:?} artifact")))
        };
        let map = GestureMap::load(file(ArtifactRole::GestureMap)?)?;
        let scaler = Scaler::load(file(ArtifactRole::Scaler)?)?;
        let threshold = Threshold::load(file(ArtifactRole::Threshold)?)?;
        let mut backend = Backend::load(kind, file(ArtifactRole::Model)?)?;
        if let Some(rows) = options.batch_rows {
            backend = backend.with_batch_rows(rows);
        }

        let mut bundle = Self::from_parts(FeatureCodec::new(map), scaler, threshold, backend)?;
        info!(
            bundle_id = %manifest.bundle_id,
            backend = %kind,
            threshold = bundle.threshold.value(),
            "loaded model bundle"
        );
        bundle.manifest = Some(manifest);
        Ok(bundle)
    }

    /// Write every artifact and the manifest into `dir`.
    ///
    /// If `report` is given it is written as `report.txt` and listed in the
    /// manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be written.
    pub fn export(&mut self, dir: impl AsRef<Path>, report: Option<&str>) -> Result<&BundleManifest> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let kind = self.backend.kind();
        self.scaler.save(dir.join(SCALER_FILE))?;
        self.threshold.save(dir.join(THRESHOLD_FILE))?;
        self.codec.map().save(dir.join(GESTURE_MAP_FILE))?;
        self.backend.save(dir.join(kind.artifact_file_name()))?;
        let report_path = dir.join(REPORT_FILE);
        match report {
            Some(text) => std::fs::write(&report_path, text)?,
            None if report_path.exists() => std::fs::remove_file(&report_path)?,
            None => {}
        }

        let manifest = BundleManifest::seal(dir, kind)?;
        debug!(dir = %dir.display(), bundle_id = %manifest.bundle_id, "sealed bundle");
        Ok(self.manifest.insert(manifest))
    }
}

/// Hex BLAKE3 digest of a file.
fn digest_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(ScorerError::ArtifactNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(blake3::hash(&std::fs::read(path)?).to_hex().to_string())
}

fn bundle_id(artifacts: &[ArtifactDigest]) -> String {
    let mut hasher = blake3::Hasher::new();
    for artifact in artifacts {
        hasher.update(artifact.file.as_bytes());
        hasher.update(b":");
        hasher.update(artifact.blake3.as_bytes());
        hasher.update(b"\n");
    }
    short(hasher.finalize().to_hex().as_str()).to_string()
}

fn short(digest: &str) -> &str {
    digest.get(..16).unwrap_or(digest)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::backend::DenseAutoencoder;
    use crate::features::MEASUREMENT_COUNT;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    #[derive(Debug)]
    struct Identity(usize);

    impl Reconstruct for Identity {
        fn input_dim(&self) -> usize {
            self.0
        }
        fn output_dim(&self) -> usize {
            self.0
        }
        fn reconstruct_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
            Ok(rows.to_vec())
        }
    }

    #[derive(Debug)]
    struct Narrow;

    impl Reconstruct for Narrow {
        fn input_dim(&self) -> usize {
            FEATURE_DIM
        }
        fn output_dim(&self) -> usize {
            FEATURE_DIM - 1
        }
        fn reconstruct_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
            Ok(rows.iter().map(|r| r[1..].to_vec()).collect())
        }
    }

    fn dense_bundle(kind: BackendKind) -> ModelBundle {
        let mut rng = StdRng::seed_from_u64(3);
        let model = DenseAutoencoder::new(FEATURE_DIM, 8, &mut rng);
        ModelBundle::from_parts(
            FeatureCodec::default(),
            Scaler::identity(FEATURE_DIM),
            Threshold::new(0.5).unwrap(),
            Backend::compile(model, kind),
        )
        .unwrap()
    }

    #[test]
    fn test_from_parts_rejects_scaler_width() {
        let err = ModelBundle::from_parts(
            FeatureCodec::default(),
            Scaler::identity(MEASUREMENT_COUNT),
            Threshold::new(1.0).unwrap(),
            Identity(MEASUREMENT_COUNT),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScorerError::DimensionMismatch { expected: 10, actual: 9 }
        ));
    }

    #[test]
    fn test_from_parts_rejects_backend_width() {
        let err = ModelBundle::from_parts(
            FeatureCodec::default(),
            Scaler::identity(FEATURE_DIM),
            Threshold::new(1.0).unwrap(),
            Identity(12),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScorerError::DimensionMismatch { expected: 10, actual: 12 }
        ));
    }

    #[test]
    fn test_from_parts_rejects_partial_reconstruction() {
        let err = ModelBundle::from_parts(
            FeatureCodec::default(),
            Scaler::identity(FEATURE_DIM),
            Threshold::new(1.0).unwrap(),
            Narrow,
        )
        .unwrap_err();
        assert!(matches!(err, ScorerError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_score_partial_with_nothing_known() {
        let bundle = ModelBundle::from_parts(
            FeatureCodec::default(),
            Scaler::identity(FEATURE_DIM),
            Threshold::new(2.0).unwrap(),
            Identity(FEATURE_DIM),
        )
        .unwrap();
        let record = bundle.score_partial(&[None; FEATURE_DIM]).unwrap();
        assert_eq!(record, ScoreRecord::scored(0.0, 2.0, 0.0));
    }

    #[test]
    fn test_export_then_load() {
        let dir = tempdir().unwrap();
        for kind in [BackendKind::Dense, BackendKind::Compact] {
            let path = dir.path().join(kind.as_str());
            let mut bundle = dense_bundle(kind);
            let manifest = bundle.export(&path, Some("n=10\n")).unwrap().clone();
            assert_eq!(manifest.backend, kind.as_str());
            assert!(manifest.artifact(ArtifactRole::Report).is_some());
            assert!(path.join(MANIFEST_FILE).exists());

            let loaded = ModelBundle::load(&path).unwrap();
            assert_eq!(loaded.backend(), bundle.backend());
            assert_eq!(loaded.threshold().value(), 0.5);
            assert_eq!(loaded.manifest().unwrap().bundle_id, manifest.bundle_id);
        }
    }

    #[test]
    fn test_swapped_threshold_is_rejected() {
        let dir = tempdir().unwrap();
        dense_bundle(BackendKind::Dense).export(dir.path(), None).unwrap();
        Threshold::new(9.0)
            .unwrap()
            .save(dir.path().join(THRESHOLD_FILE))
            .unwrap();

        let err = ModelBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, ScorerError::BundleMismatch { .. }));
        assert!(err.to_string().contains(THRESHOLD_FILE));
    }

    #[test]
    fn test_unknown_backend_in_manifest() {
        let dir = tempdir().unwrap();
        let mut bundle = dense_bundle(BackendKind::Dense);
        let mut manifest = bundle.export(dir.path(), None).unwrap().clone();
        manifest.backend = "tflite".to_string();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();

        let err = ModelBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, ScorerError::BackendUnavailable { .. }));
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempdir().unwrap();
        let err = ModelBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, ScorerError::ArtifactNotFound { .. }));
    }

    #[test]
    fn test_batch_rows_option() {
        let dir = tempdir().unwrap();
        dense_bundle(BackendKind::Compact).export(dir.path(), None).unwrap();
        let loaded = ModelBundle::load_with(dir.path(), &LoadOptions { batch_rows: Some(7) }).unwrap();
        match loaded.backend() {
            Backend::Compact(graph) => assert_eq!(graph.batch_rows(), 7),
            Backend::Dense(_) => panic!("expected compact backend"),
        }
    }
}
