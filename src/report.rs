//! Training report and deterministic seeding.
//!
//! Metrics are kept in insertion order and rendered as `key=value` lines,
//! which is the format of `report.txt` inside a bundle.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::time::{Duration, Instant};

/// Name hashed into the default training seed.
pub const DEFAULT_SEED_NAME: &str = "touch-autoencoder";

/// A metric value that can be recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Integer metric (e.g., row count)
    Int(i64),
    /// Float metric (e.g., threshold)
    Float(f64),
    /// Duration metric
    Duration(Duration),
    /// String metric
    String(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Duration(d) => write!(f, "{:.2}ms", d.as_secs_f64() * 1000.0),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Metrics collected while training one bundle.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    started: Instant,
    metrics: Vec<(String, MetricValue)>,
}

impl Default for TrainingReport {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingReport {
    /// Start an empty report; the clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            metrics: Vec::new(),
        }
    }

    /// Time since the report was started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn record(&mut self, name: &str, value: MetricValue) {
        match self.metrics.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.metrics.push((name.to_string(), value)),
        }
    }

    /// Record an integer metric.
    pub fn record_metric(&mut self, name: &str, value: i64) {
        self.record(name, MetricValue::Int(value));
    }

    /// Record a count.
    pub fn record_count(&mut self, name: &str, value: usize) {
        self.record(name, MetricValue::Int(i64::try_from(value).unwrap_or(i64::MAX)));
    }

    /// Record a float metric.
    pub fn record_float_metric(&mut self, name: &str, value: f64) {
        self.record(name, MetricValue::Float(value));
    }

    /// Record a duration metric.
    pub fn record_duration(&mut self, name: &str, duration: Duration) {
        self.record(name, MetricValue::Duration(duration));
    }

    /// Record a string metric.
    pub fn record_string_metric(&mut self, name: &str, value: impl Into<String>) {
        self.record(name, MetricValue::String(value.into()));
    }

    /// Get a recorded metric.
    #[must_use]
    pub fn get_metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Recorded metrics in insertion order.
    pub fn metrics(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.metrics.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Render as `key=value` lines.
    #[must_use]
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.metrics {
            writeln!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// Hash a name to a deterministic u64 seed.
///
/// Uses BLAKE3 so the seed is the same on every platform.
#[must_use]
pub fn seed_from_name(name: &str) -> u64 {
    let hash = blake3::hash(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// RNG for training: the explicit seed if given, else the default name seed.
#[must_use]
pub fn training_rng(seed: Option<u64>) -> StdRng {
    StdRng::seed_from_u64(seed.unwrap_or_else(|| seed_from_name(DEFAULT_SEED_NAME)))
}
