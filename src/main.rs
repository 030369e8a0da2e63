//! `touch-scorer` command-line tool.
//!
//! ```bash
//! touch-scorer train data/normal_touch.csv --out models/touch_ae --backend compact
//! touch-scorer score data/session.csv --bundle models/touch_ae --out scored.csv
//! touch-scorer serve --bundle models/touch_ae < requests.jsonl
//! touch-scorer inspect --bundle models/touch_ae
//! touch-scorer decode 1.0
//! ```
//!
//! Logs go to stderr; stdout carries only results.

use clap::{Parser, Subcommand};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use touch_scorer::aprender_integration::ModelFileInfo;
use touch_scorer::backend::{Backend, BackendKind, Reconstruct};
use touch_scorer::batch::{parse_rows, read_rows_from_path, BatchDriver};
use touch_scorer::bundle::{BundleManifest, LoadOptions, ModelBundle, GESTURE_MAP_FILE};
use touch_scorer::config::{ScorerConfig, DEFAULT_LOG_FILTER};
use touch_scorer::features::{FeatureCodec, GestureMap, DEFAULT_DECODE_TOLERANCE};
use touch_scorer::service::ScoringService;
use touch_scorer::training::Collected;
use touch_scorer::{ErrorKind, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "touch-scorer")]
#[command(about = "Touch-gesture anomaly scoring")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults to $TOUCH_SCORER_CONFIG)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `touch_scorer=trace`
    #[arg(long, global = true, value_name = "FILTER")]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a bundle from CSV files of normal gestures
    Train {
        /// Headerless gesture CSV files
        #[arg(required = true, value_name = "CSV")]
        csv: Vec<PathBuf>,

        /// Output bundle directory
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Backend to export (dense, compact)
        #[arg(long)]
        backend: Option<BackendKind>,

        /// Threshold multiplier on the error standard deviation
        #[arg(short, long)]
        k: Option<f64>,

        /// Training epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Rows per gradient step
        #[arg(long)]
        batch_size: Option<usize>,

        /// Optimizer step size
        #[arg(long)]
        learning_rate: Option<f64>,

        /// Hidden layer width
        #[arg(long)]
        hidden_dim: Option<usize>,

        /// RNG seed
        #[arg(long)]
        seed: Option<u64>,

        /// Label map JSON (defaults to TAP=0, SWIPE=1)
        #[arg(long, value_name = "FILE")]
        gesture_map: Option<PathBuf>,
    },

    /// Score a CSV file and print summary statistics
    Score {
        /// Headerless gesture CSV file
        #[arg(value_name = "CSV")]
        csv: PathBuf,

        /// Bundle directory
        #[arg(long, value_name = "DIR")]
        bundle: Option<PathBuf>,

        /// Write the input rows with mse,score appended
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,

        /// Compact-backend chunk size
        #[arg(long)]
        batch_rows: Option<usize>,
    },

    /// Score JSON requests from stdin, one result line per input line
    Serve {
        /// Bundle directory
        #[arg(long, value_name = "DIR")]
        bundle: Option<PathBuf>,

        /// Compact-backend chunk size
        #[arg(long)]
        batch_rows: Option<usize>,
    },

    /// Verify a bundle and print its manifest
    Inspect {
        /// Bundle directory
        #[arg(long, value_name = "DIR")]
        bundle: Option<PathBuf>,
    },

    /// Look up the gesture label for a numeric code
    Decode {
        /// Numeric gesture code
        #[arg(allow_negative_numbers = true)]
        code: f64,

        /// Maximum distance from a stored code
        #[arg(long, default_value_t = DEFAULT_DECODE_TOLERANCE)]
        tol: f64,

        /// Label map JSON
        #[arg(long, value_name = "FILE", conflicts_with = "bundle")]
        gesture_map: Option<PathBuf>,

        /// Take the label map from a bundle directory
        #[arg(long, value_name = "DIR")]
        bundle: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            match e.kind() {
                ErrorKind::InputRecord => ExitCode::from(1),
                ErrorKind::Configuration => ExitCode::from(2),
                ErrorKind::BackendUnavailable => ExitCode::from(3),
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut cfg = ScorerConfig::load(cli.config.as_deref())?;
    if let Some(filter) = cli.log {
        cfg.log_filter = filter;
    }
    init_logging(&cfg.log_filter);

    match cli.command {
        Command::Train {
            csv,
            out,
            backend,
            k,
            epochs,
            batch_size,
            learning_rate,
            hidden_dim,
            seed,
            gesture_map,
        } => {
            let t = &mut cfg.training;
            if let Some(v) = backend {
                t.backend = v;
            }
            if let Some(v) = k {
                t.threshold_k = v;
            }
            if let Some(v) = epochs {
                t.fit.epochs = v;
            }
            if let Some(v) = batch_size {
                t.fit.batch_size = v;
            }
            if let Some(v) = learning_rate {
                t.fit.learning_rate = v;
            }
            if hidden_dim.is_some() {
                t.hidden_dim = hidden_dim;
            }
            if seed.is_some() {
                t.seed = seed;
            }
            if let Some(dir) = out {
                cfg.bundle_dir = dir;
            }
            cfg.validate()?;
            train(&cfg, &csv, gesture_map.as_deref())
        }
        Command::Score {
            csv,
            bundle,
            out,
            batch_rows,
        } => {
            apply_bundle_flags(&mut cfg, bundle, batch_rows)?;
            score(&cfg, &csv, out.as_deref())
        }
        Command::Serve { bundle, batch_rows } => {
            apply_bundle_flags(&mut cfg, bundle, batch_rows)?;
            serve(&cfg)
        }
        Command::Inspect { bundle } => {
            apply_bundle_flags(&mut cfg, bundle, None)?;
            inspect(&cfg.bundle_dir)
        }
        Command::Decode {
            code,
            tol,
            gesture_map,
            bundle,
        } => {
            let map = match (gesture_map, bundle) {
                (Some(path), _) => GestureMap::load(path)?,
                (None, Some(dir)) => GestureMap::load(dir.join(GESTURE_MAP_FILE))?,
                (None, None) => GestureMap::default(),
            };
            let codec = FeatureCodec::new(map);
            println!("{}", codec.decode(code, tol)?);
            Ok(())
        }
    }
}

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn apply_bundle_flags(
    cfg: &mut ScorerConfig,
    bundle: Option<PathBuf>,
    batch_rows: Option<usize>,
) -> Result<()> {
    if let Some(dir) = bundle {
        cfg.bundle_dir = dir;
    }
    if let Some(rows) = batch_rows {
        cfg.batch_rows = rows;
    }
    cfg.validate()
}

fn load_bundle(cfg: &ScorerConfig) -> Result<ModelBundle> {
    ModelBundle::load_with(
        &cfg.bundle_dir,
        &LoadOptions {
            batch_rows: Some(cfg.batch_rows),
        },
    )
}

fn train(cfg: &ScorerConfig, inputs: &[PathBuf], gesture_map: Option<&Path>) -> Result<()> {
    let codec = match gesture_map {
        Some(path) => FeatureCodec::new(GestureMap::load(path)?),
        None => FeatureCodec::default(),
    };

    let mut records = Vec::new();
    let mut malformed = 0;
    for path in inputs {
        let rows = read_rows_from_path(path)?;
        let parsed = parse_rows(&rows, |_| true);
        info!(file = %path.display(), rows = rows.len(), parsed = parsed.records.len(), "read training csv");
        records.extend(parsed.records);
        malformed += parsed.malformed;
    }

    let (bundle, report) = Collected::collect(codec, &records)?
        .with_skipped(malformed)
        .fit_scaler()?
        .fit_model(&cfg.training)?
        .compute_threshold(cfg.training.threshold_k)?
        .export(&cfg.bundle_dir)?;

    println!("Saved bundle to {}", cfg.bundle_dir.display());
    if let Some(manifest) = bundle.manifest() {
        println!("bundle_id={}", manifest.bundle_id);
    }
    print!("{report}");
    Ok(())
}

fn score(cfg: &ScorerConfig, csv: &Path, out: Option<&Path>) -> Result<()> {
    let bundle = load_bundle(cfg)?;
    let rows = read_rows_from_path(csv)?;
    let outcome = BatchDriver::new(&bundle).run_rows(&rows)?;

    let summary = outcome.summary();
    info!(
        samples = summary.samples,
        mse_mean = summary.mse_mean,
        score_mean = summary.score_mean,
        "batch summary"
    );
    println!("{summary}");

    if let Some(path) = out {
        let file = std::fs::File::create(path)?;
        outcome.write_scored(&rows, BufWriter::new(file))?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn serve(cfg: &ScorerConfig) -> Result<()> {
    let service = ScoringService::new(load_bundle(cfg)?);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    service.run(stdin.lock(), stdout.lock())?;
    Ok(())
}

fn inspect(dir: &Path) -> Result<()> {
    let manifest = BundleManifest::load(dir)?;
    let bundle = ModelBundle::load(dir)?;
    let mut out = std::io::stdout().lock();

    writeln!(out, "Bundle:     {}", dir.display())?;
    writeln!(out, "ID:         {}", manifest.bundle_id)?;
    writeln!(out, "Producer:   {}", manifest.producer)?;
    writeln!(out, "Backend:    {}", manifest.backend)?;
    writeln!(out, "Features:   {} ({})", manifest.feature_dim, manifest.feature_names.join(", "))?;
    writeln!(
        out,
        "Labels:     {}",
        bundle.codec().map().labels().collect::<Vec<_>>().join(", ")
    )?;
    writeln!(out, "Threshold:  {}", bundle.threshold().value())?;
    writeln!(out, "Parameters: {}", bundle.backend().num_params())?;

    match bundle.backend() {
        Backend::Dense(model) => {
            let path = dir.join(BackendKind::Dense.artifact_file_name());
            let info = ModelFileInfo::from_path(&path)?;
            writeln!(
                out,
                "Model:      {} v{}.{} ({} bytes, hidden {})",
                info.name().unwrap_or("unnamed"),
                info.version().0,
                info.version().1,
                info.payload_size(),
                model.hidden_dim()
            )?;
        }
        Backend::Compact(graph) => {
            let [batch, width] = graph.declared_input_shape();
            writeln!(
                out,
                "Model:      int8 graph, input [{batch}, {width}], {} rows per chunk, output {}",
                graph.batch_rows(),
                graph.output_dim()
            )?;
        }
    }

    writeln!(out, "Artifacts:")?;
    for artifact in &manifest.artifacts {
        writeln!(out, "  {:<18} {}", artifact.file, artifact.blake3)?;
    }
    Ok(())
}
