//! Persistent line-oriented scoring service.
//!
//! One JSON object per input line, one JSON object per output line, flushed
//! as soon as it is written. A bad line produces `{"ok":false,"error":...}`
//! and the loop moves on; only I/O failure on the streams ends it early.
//!
//! Recognized request keys are `gesture` (label or numeric code),
//! `gesture_num`, and the nine measurement names. Anything else, and any
//! value that is not a number, is ignored.

use crate::backend::{Backend, Reconstruct};
use crate::bundle::ModelBundle;
use crate::error::{Result, ScorerError};
use crate::features::{FEATURE_DIM, FEATURE_NAMES};
use crate::scorer::ScoreRecord;
use serde_json::{Map, Value};
use std::io::{BufRead, Write};
use tracing::{debug, info};

/// Counters reported when the input closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    /// Lines read
    pub lines: u64,
    /// Lines answered with a score
    pub ok: u64,
    /// Lines answered with an error
    pub failed: u64,
}

/// Scores request lines against one bundle for the life of the process.
#[derive(Debug)]
pub struct ScoringService<R = Backend> {
    bundle: ModelBundle<R>,
}

impl<R: Reconstruct> ScoringService<R> {
    /// Wrap a loaded bundle.
    #[must_use]
    pub fn new(bundle: ModelBundle<R>) -> Self {
        Self { bundle }
    }

    /// The bundle requests are scored against.
    #[must_use]
    pub fn bundle(&self) -> &ModelBundle<R> {
        &self.bundle
    }

    /// Answer one request line. Never fails; errors become `ok: false`.
    #[must_use]
    pub fn score_line(&self, line: &str) -> ScoreRecord {
        match self.try_score_line(line) {
            Ok(record) => record,
            Err(e) => ScoreRecord::failed(e.to_string()),
        }
    }

    fn try_score_line(&self, line: &str) -> Result<ScoreRecord> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ScorerError::invalid_record("empty request"));
        }
        let value: Value = serde_json::from_str(line)?;
        let object = value
            .as_object()
            .ok_or_else(|| ScorerError::invalid_record("request must be a JSON object"))?;
        let features = self.extract(object);
        self.bundle.score_partial(&features)
    }

    /// Feature values present in a request, in vector order.
    #[must_use]
    pub fn extract(&self, request: &Map<String, Value>) -> [Option<f64>; FEATURE_DIM] {
        let mut features = [None; FEATURE_DIM];
        features[0] = request
            .get("gesture_num")
            .and_then(number)
            .or_else(|| request.get("gesture").and_then(|g| self.gesture_code(g)));
        for (slot, name) in features.iter_mut().zip(FEATURE_NAMES).skip(1) {
            *slot = request.get(name).and_then(number);
        }
        features
    }

    fn gesture_code(&self, value: &Value) -> Option<f64> {
        match value {
            Value::String(label) => self.bundle.codec().map().code(label),
            other => number(other),
        }
    }

    /// Serve until `input` is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error only if reading `input` or writing `output` fails.
    pub fn run<I: BufRead, O: Write>(&self, mut input: I, mut output: O) -> Result<ServiceStats> {
        let mut stats = ServiceStats::default();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            stats.lines += 1;

            let record = match std::str::from_utf8(&buf) {
                Ok(line) => self.score_line(line),
                Err(_) => ScoreRecord::failed("request is not valid UTF-8"),
            };
            if record.ok {
                stats.ok += 1;
            } else {
                stats.failed += 1;
                debug!(line = stats.lines, error = ?record.error, "rejected request");
            }

            serde_json::to_writer(&mut output, &record)?;
            output.write_all(b"\n")?;
            output.flush()?;
        }

        info!(lines = stats.lines, ok = stats.ok, failed = stats.failed, "input closed");
        Ok(stats)
    }
}

/// Finite numeric JSON value; booleans and strings are not numbers.
fn number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}
