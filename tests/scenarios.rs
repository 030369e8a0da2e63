//! End-to-end scoring scenarios: fixed backends, CSV batches, the line
//! service, and bundles written to disk.

#![allow(clippy::disallowed_methods)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use touch_scorer::backend::{BackendKind, DenseAutoencoder, FitOptions, Reconstruct};
use touch_scorer::batch::{read_rows, BatchDriver};
use touch_scorer::bundle::{BundleManifest, ModelBundle, SCALER_FILE};
use touch_scorer::features::{FeatureCodec, RawRecord, FEATURE_DIM};
use touch_scorer::scaler::Scaler;
use touch_scorer::service::ScoringService;
use touch_scorer::threshold::Threshold;
use touch_scorer::training::{train, TrainingConfig};
use touch_scorer::{Result, ScorerError};

const SWIPE_ROW: &str = "SWIPE,250,137.1,0.548,0.622,0.709,0.988,0.483,0,0.355";

#[derive(Debug)]
struct Identity;

impl Reconstruct for Identity {
    fn input_dim(&self) -> usize {
        FEATURE_DIM
    }
    fn output_dim(&self) -> usize {
        FEATURE_DIM
    }
    fn reconstruct_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        Ok(rows.to_vec())
    }
}

#[derive(Debug)]
struct Zero;

impl Reconstruct for Zero {
    fn input_dim(&self) -> usize {
        FEATURE_DIM
    }
    fn output_dim(&self) -> usize {
        FEATURE_DIM
    }
    fn reconstruct_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        Ok(rows.iter().map(|_| vec![0.0; FEATURE_DIM]).collect())
    }
}

fn unit_bundle<R: Reconstruct>(backend: R) -> ModelBundle<R> {
    ModelBundle::from_parts(
        FeatureCodec::default(),
        Scaler::new(vec![0.0; FEATURE_DIM], vec![1.0; FEATURE_DIM]).unwrap(),
        Threshold::new(1.0).unwrap(),
        backend,
    )
    .unwrap()
}

fn record(line: &str) -> RawRecord {
    let fields: Vec<&str> = line.split(',').collect();
    RawRecord::from_fields(&fields).unwrap()
}

fn normal_corpus(n: usize, seed: u64) -> Vec<RawRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let swipe = i % 3 == 0;
            let duration = if swipe { 250.0 } else { 90.0 } + rng.gen_range(-20.0..20.0);
            let distance = if swipe { 140.0 } else { 3.0 } + rng.gen_range(-2.0..2.0);
            let velocity = distance / duration;
            RawRecord::new(
                if swipe { "SWIPE" } else { "TAP" },
                [
                    duration,
                    distance,
                    velocity,
                    velocity * rng.gen_range(1.0..1.3),
                    rng.gen_range(0.6..0.8),
                    rng.gen_range(0.9..1.0),
                    rng.gen_range(0.0..0.5),
                    f64::from(rng.gen_range(0..3u8)),
                    rng.gen_range(0.0..0.4),
                ],
            )
        })
        .collect()
}

fn quick_config(backend: BackendKind) -> TrainingConfig {
    TrainingConfig {
        backend,
        fit: FitOptions {
            epochs: 5,
            batch_size: 32,
            learning_rate: 1e-2,
        },
        ..TrainingConfig::default()
    }
}

#[test]
fn identity_backend_scores_zero() {
    let bundle = unit_bundle(Identity);
    let scored = bundle.score_record(&record(SWIPE_ROW)).unwrap();
    assert!(scored.ok);
    assert_eq!(scored.mse, Some(0.0));
    assert_eq!(scored.score, Some(0.0));
    assert_eq!(scored.threshold, Some(1.0));
}

#[test]
fn zero_backend_scores_mean_square() {
    let bundle = unit_bundle(Zero);
    for line in [SWIPE_ROW, "TAP,0.1,0.2,0.3,0.1,0.5,0.6,0.2,0,0.1"] {
        let input = record(line);
        let features = bundle.codec().encode(&input).unwrap();
        let mean_sq = features.as_slice().iter().map(|x| x * x).sum::<f64>() / FEATURE_DIM as f64;

        let scored = bundle.score_record(&input).unwrap();
        assert!((scored.mse.unwrap() - mean_sq).abs() < 1e-12);
        assert!((scored.score.unwrap() - mean_sq.min(1.0)).abs() < 1e-12);
    }
}

#[test]
fn service_survives_malformed_line() {
    let service = ScoringService::new(unit_bundle(Zero));
    let input = "{bad json\n{\"duration_ms\": 0.5}\n";
    let mut output = Vec::new();
    let stats = service.run(input.as_bytes(), &mut output).unwrap();

    let text = String::from_utf8(output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(stats.failed, 1);

    let first: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["ok"], false);
    assert!(!first["error"].as_str().unwrap().is_empty());

    let second: Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["ok"], true);
    assert_eq!(second["mse"], 0.25);
}

#[test]
fn batch_drops_unknown_label_and_keeps_order() {
    let csv = "\
TAP,1,0,0,0,0,0,0,0,0
SWIPE,2,0,0,0,0,0,0,0,0
PINCH,3,0,0,0,0,0,0,0,0
TAP,4,0,0,0,0,0,0,0,0
SWIPE,5,0,0,0,0,0,0,0,0
";
    let bundle = unit_bundle(Zero);
    let rows = read_rows(csv.as_bytes()).unwrap();
    let outcome = BatchDriver::new(&bundle).run_rows(&rows).unwrap();

    assert_eq!(outcome.scores.len(), 4);
    assert_eq!(outcome.row_indices, vec![0, 1, 3, 4]);
    let mse: Vec<f64> = outcome.scores.iter().map(|s| s.mse.unwrap()).collect();
    assert_eq!(mse, vec![0.1, 0.5, 1.6, 2.6]);
}

#[test]
fn scaler_width_mismatch_caught_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let records = normal_corpus(60, 1);
    train(FeatureCodec::default(), &records, &quick_config(BackendKind::Dense))
        .unwrap()
        .export(dir.path())
        .unwrap();

    Scaler::identity(FEATURE_DIM - 1)
        .save(dir.path().join(SCALER_FILE))
        .unwrap();
    BundleManifest::seal(dir.path(), BackendKind::Dense).unwrap();

    let err = ModelBundle::load(dir.path()).unwrap_err();
    assert!(matches!(
        err,
        ScorerError::DimensionMismatch { expected: 10, actual: 9 }
    ));
}

#[test]
fn model_width_mismatch_caught_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let records = normal_corpus(60, 2);
    train(FeatureCodec::default(), &records, &quick_config(BackendKind::Dense))
        .unwrap()
        .export(dir.path())
        .unwrap();

    let mut rng = StdRng::seed_from_u64(4);
    DenseAutoencoder::new(FEATURE_DIM + 2, 8, &mut rng)
        .save(dir.path().join(BackendKind::Dense.artifact_file_name()))
        .unwrap();
    BundleManifest::seal(dir.path(), BackendKind::Dense).unwrap();

    let err = ModelBundle::load(dir.path()).unwrap_err();
    assert!(matches!(
        err,
        ScorerError::DimensionMismatch { expected: 10, actual: 12 }
    ));
}

#[test]
fn swapped_model_is_bundle_mismatch() {
    let root = tempfile::tempdir().unwrap();
    let a = root.path().join("a");
    let b = root.path().join("b");
    let config = quick_config(BackendKind::Compact);
    train(FeatureCodec::default(), &normal_corpus(60, 3), &config)
        .unwrap()
        .export(&a)
        .unwrap();
    train(FeatureCodec::default(), &normal_corpus(60, 4), &config)
        .unwrap()
        .export(&b)
        .unwrap();

    let model = BackendKind::Compact.artifact_file_name();
    std::fs::copy(b.join(model), a.join(model)).unwrap();

    let err = ModelBundle::load(&a).unwrap_err();
    assert!(matches!(err, ScorerError::BundleMismatch { .. }));
    ModelBundle::load(&b).unwrap();
}

#[test]
fn train_export_load_score() {
    for kind in [BackendKind::Dense, BackendKind::Compact] {
        let dir = tempfile::tempdir().unwrap();
        let records = normal_corpus(200, 5);
        let (trained, _) = train(FeatureCodec::default(), &records, &quick_config(kind))
            .unwrap()
            .export(dir.path())
            .unwrap();
        let loaded = ModelBundle::load(dir.path()).unwrap();

        assert_eq!(loaded.backend().kind(), kind);
        assert_eq!(loaded.threshold(), trained.threshold());
        assert_eq!(
            loaded.score_record(&records[0]).unwrap(),
            trained.score_record(&records[0]).unwrap()
        );

        let scores = BatchDriver::new(&loaded).run(&records).unwrap();
        assert_eq!(scores.len(), records.len());
        let mean_score = scores.iter().map(|s| s.score.unwrap()).sum::<f64>() / scores.len() as f64;
        assert!(mean_score < 1.0);

        let outlier = RawRecord::new("SWIPE", [9000.0, 1e4, 50.0, 90.0, 0.0, 0.0, 40.0, 80.0, 30.0]);
        assert_eq!(loaded.score_record(&outlier).unwrap().score, Some(1.0));
    }
}
