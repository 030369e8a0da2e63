//! Layered configuration.
//!
//! Built-in defaults, then an optional TOML file, then `TOUCH_SCORER_*`
//! environment variables. Command-line flags are applied last by the binary.
//!
//! ```toml
//! [bundle]
//! dir = "models/touch_ae"
//! backend = "compact"
//!
//! [training]
//! threshold_k = 3.0
//! epochs = 5
//! batch_size = 64
//! learning_rate = 0.001
//! hidden_dim = 8
//! seed = 42
//!
//! [inference]
//! batch_rows = 128
//!
//! [logging]
//! filter = "info"
//! ```

use crate::backend::compact::DEFAULT_BATCH_ROWS;
use crate::backend::BackendKind;
use crate::error::{Result, ScorerError};
use crate::training::TrainingConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "TOUCH_SCORER_CONFIG";

/// Default bundle directory.
pub const DEFAULT_BUNDLE_DIR: &str = "models/touch_ae";

/// Default log filter.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Resolved settings for every subcommand.
#[derive(Debug, Clone, PartialEq)]
pub struct ScorerConfig {
    /// Bundle directory to read from or write to
    pub bundle_dir: PathBuf,
    /// Training settings, including the backend to export
    pub training: TrainingConfig,
    /// Compact-backend chunk size
    pub batch_rows: usize,
    /// `tracing` filter directive
    pub log_filter: String,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            bundle_dir: PathBuf::from(DEFAULT_BUNDLE_DIR),
            training: TrainingConfig::default(),
            batch_rows: DEFAULT_BATCH_ROWS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bundle: Option<FileBundle>,
    training: Option<FileTraining>,
    inference: Option<FileInference>,
    logging: Option<FileLogging>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileBundle {
    dir: Option<PathBuf>,
    backend: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileTraining {
    threshold_k: Option<f64>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    learning_rate: Option<f64>,
    hidden_dim: Option<usize>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileInference {
    batch_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileLogging {
    filter: Option<String>,
}

impl ScorerConfig {
    /// Defaults, then `path` (or `$TOUCH_SCORER_CONFIG`), then environment.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the file cannot be parsed, a value cannot be
    /// parsed, or the result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::default();
        let env_path = env_non_empty(CONFIG_PATH_ENV).map(PathBuf::from);
        if let Some(path) = path.map(Path::to_path_buf).or(env_path) {
            cfg.apply_file(&path)?;
        }
        cfg.apply_env_with(env_non_empty)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply a TOML file on top of the current values.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactNotFound` for a missing file and `Config` for bad
    /// contents.
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(ScorerError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        self.apply_toml(&raw).map_err(|e| match e {
            ScorerError::Config { reason } => {
                ScorerError::config(format!("{}: {reason}", path.display()))
            }
            other => other,
        })?;
        debug!(path = %path.display(), "applied config file");
        Ok(())
    }

    /// Apply TOML text on top of the current values.
    ///
    /// # Errors
    ///
    /// Returns `Config` for unparseable TOML, unknown keys or a bad backend.
    pub fn apply_toml(&mut self, raw: &str) -> Result<()> {
        let file: FileConfig =
            toml::from_str(raw).map_err(|e| ScorerError::config(e.to_string()))?;

        if let Some(bundle) = file.bundle {
            if let Some(dir) = bundle.dir {
                self.bundle_dir = dir;
            }
            if let Some(backend) = bundle.backend {
                self.training.backend = parse_backend(&backend)?;
            }
        }
        if let Some(training) = file.training {
            let t = &mut self.training;
            if let Some(v) = training.threshold_k {
                t.threshold_k = v;
            }
            if let Some(v) = training.epochs {
                t.fit.epochs = v;
            }
            if let Some(v) = training.batch_size {
                t.fit.batch_size = v;
            }
            if let Some(v) = training.learning_rate {
                t.fit.learning_rate = v;
            }
            if training.hidden_dim.is_some() {
                t.hidden_dim = training.hidden_dim;
            }
            if training.seed.is_some() {
                t.seed = training.seed;
            }
        }
        if let Some(v) = file.inference.and_then(|i| i.batch_rows) {
            self.batch_rows = v;
        }
        if let Some(v) = file.logging.and_then(|l| l.filter) {
            self.log_filter = v;
        }
        Ok(())
    }

    /// Apply `TOUCH_SCORER_*` overrides read through `var`.
    ///
    /// # Errors
    ///
    /// Returns `Config` naming the variable if a value cannot be parsed.
    pub fn apply_env_with<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("TOUCH_SCORER_BUNDLE_DIR") {
            self.bundle_dir = PathBuf::from(v);
        }
        if let Some(v) = var("TOUCH_SCORER_BACKEND") {
            self.training.backend = parse_backend(&v)?;
        }
        if let Some(v) = env_parse(&var, "TOUCH_SCORER_THRESHOLD_K")? {
            self.training.threshold_k = v;
        }
        if let Some(v) = env_parse(&var, "TOUCH_SCORER_EPOCHS")? {
            self.training.fit.epochs = v;
        }
        if let Some(v) = env_parse(&var, "TOUCH_SCORER_BATCH_SIZE")? {
            self.training.fit.batch_size = v;
        }
        if let Some(v) = env_parse(&var, "TOUCH_SCORER_LEARNING_RATE")? {
            self.training.fit.learning_rate = v;
        }
        if let Some(v) = env_parse(&var, "TOUCH_SCORER_HIDDEN_DIM")? {
            self.training.hidden_dim = Some(v);
        }
        if let Some(v) = env_parse(&var, "TOUCH_SCORER_SEED")? {
            self.training.seed = Some(v);
        }
        if let Some(v) = env_parse(&var, "TOUCH_SCORER_BATCH_ROWS")? {
            self.batch_rows = v;
        }
        if let Some(v) = var("TOUCH_SCORER_LOG") {
            self.log_filter = v;
        }
        Ok(())
    }

    /// Check every value.
    ///
    /// # Errors
    ///
    /// Returns `Config` for the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        if self.batch_rows == 0 {
            return Err(ScorerError::config("batch_rows must be at least 1"));
        }
        if self.log_filter.trim().is_empty() {
            return Err(ScorerError::config("log filter must not be empty"));
        }
        Ok(())
    }
}

fn parse_backend(raw: &str) -> Result<BackendKind> {
    BackendKind::from_str(raw).map_err(|e| ScorerError::config(format!("backend: {e}")))
}

fn env_parse<T, F>(var: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ScorerError::config(format!("{name}={raw}: {e}")))
        })
        .transpose()
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
