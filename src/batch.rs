//! Batch inference over CSV files.
//!
//! Input is headerless CSV, one gesture per row:
//!
//! ```text
//! label,duration_ms,total_distance,avg_velocity,peak_velocity,avg_pressure,peak_pressure,path_deviation,direction_changes,jitter
//! ```
//!
//! Rows with an unknown label are dropped before feature extraction. Rows
//! with a known label but malformed measurements are reported and skipped.
//! Either way the batch carries on; only a batch with nothing left to score
//! is an error.

use crate::backend::{Backend, Reconstruct};
use crate::bundle::ModelBundle;
use crate::error::{Result, ScorerError};
use crate::features::RawRecord;
use crate::scorer::ScoreRecord;
use crate::threshold::mean_std;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// One CSV row as read, fields untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    /// 1-based line number in the source
    pub line: u64,
    /// Raw fields, lossily decoded when the row is not valid UTF-8
    pub fields: Vec<String>,
    /// False when some field was not valid UTF-8
    pub utf8: bool,
}

impl CsvRow {
    /// First field, the gesture label.
    #[must_use]
    pub fn label(&self) -> &str {
        self.fields.first().map_or("", |f| f.trim())
    }

    /// Parse into a raw record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if the row is not valid UTF-8, has the wrong
    /// field count, or a field is not numeric.
    pub fn to_record(&self) -> Result<RawRecord> {
        if !self.utf8 {
            return Err(ScorerError::invalid_record("row is not valid UTF-8"));
        }
        RawRecord::from_fields(&self.fields)
    }
}

/// Read every non-blank row of a headerless CSV stream.
///
/// A row that is not valid UTF-8 is kept with `utf8 == false` so it can be
/// counted as malformed instead of failing the stream.
///
/// # Errors
///
/// Returns a `Csv` error if the stream cannot be read.
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<CsvRow>> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in csv.byte_records() {
        let record = result?;
        if record.iter().all(|f| f.iter().all(u8::is_ascii_whitespace)) {
            continue;
        }
        let utf8 = record.iter().all(|f| std::str::from_utf8(f).is_ok());
        rows.push(CsvRow {
            line: record.position().map_or(0, |p| p.line()),
            fields: record
                .iter()
                .map(|f| String::from_utf8_lossy(f).into_owned())
                .collect(),
            utf8,
        });
    }
    Ok(rows)
}

/// Read rows from a file.
///
/// # Errors
///
/// Returns `ArtifactNotFound` if the file does not exist, or a read error.
pub fn read_rows_from_path(path: impl AsRef<Path>) -> Result<Vec<CsvRow>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ScorerError::ArtifactNotFound {
            path: path.to_path_buf(),
        });
    }
    read_rows(std::fs::File::open(path)?)
}

/// Records parsed from CSV rows, with the rows they came from.
#[derive(Debug, Clone, Default)]
pub struct ParsedRows {
    /// Parsed records in input order
    pub records: Vec<RawRecord>,
    /// Index into the source rows of each record
    pub row_indices: Vec<usize>,
    /// Rows with an unknown label
    pub unknown: usize,
    /// Rows with a known label that failed to parse
    pub malformed: usize,
}

/// Keep rows whose label is in `known` and parse them.
pub fn parse_rows(rows: &[CsvRow], known: impl Fn(&str) -> bool) -> ParsedRows {
    let mut parsed = ParsedRows::default();
    for (index, row) in rows.iter().enumerate() {
        if !row.utf8 {
            warn!(line = row.line, "skipping row with invalid UTF-8");
            parsed.malformed += 1;
            continue;
        }
        if !known(row.label()) {
            parsed.unknown += 1;
            continue;
        }
        match row.to_record() {
            Ok(record) => {
                parsed.records.push(record);
                parsed.row_indices.push(index);
            }
            Err(e) => {
                warn!(line = row.line, error = %e, "skipping malformed row");
                parsed.malformed += 1;
            }
        }
    }
    parsed
}

/// Result of scoring a CSV.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One score per surviving row, in input order
    pub scores: Vec<ScoreRecord>,
    /// Source row index of each score
    pub row_indices: Vec<usize>,
    /// Rows dropped for an unknown label
    pub unknown: usize,
    /// Rows skipped as malformed
    pub malformed: usize,
}

impl BatchOutcome {
    /// Summary statistics over the scored rows.
    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary::from_scores(&self.scores)
    }

    /// Write every source row in order with `mse,score` appended.
    ///
    /// Rows that were not scored get empty `mse` and `score` fields.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_scored<W: Write>(&self, rows: &[CsvRow], writer: W) -> Result<()> {
        let mut out = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(writer);

        let mut scored = self.row_indices.iter().zip(&self.scores).peekable();
        for (index, row) in rows.iter().enumerate() {
            let (mse, score) = match scored.peek() {
                Some((i, record)) if **i == index => {
                    let cells = (fmt_opt(record.mse), fmt_opt(record.score));
                    scored.next();
                    cells
                }
                _ => (String::new(), String::new()),
            };
            let mut fields = row.fields.clone();
            fields.push(mse);
            fields.push(score);
            out.write_record(&fields)?;
        }
        out.flush()?;
        Ok(())
    }
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Runs records through a loaded bundle.
#[derive(Debug, Clone, Copy)]
pub struct BatchDriver<'b, R = Backend> {
    bundle: &'b ModelBundle<R>,
}

impl<'b, R: Reconstruct> BatchDriver<'b, R> {
    /// Create a driver over a bundle.
    #[must_use]
    pub fn new(bundle: &'b ModelBundle<R>) -> Self {
        Self { bundle }
    }

    /// Score every record with a known label, in input order.
    ///
    /// # Errors
    ///
    /// Returns `EmptyBatch` if no record has a known label.
    pub fn run(&self, records: &[RawRecord]) -> Result<Vec<ScoreRecord>> {
        let codec = self.bundle.codec();
        let features: Vec<_> = records
            .iter()
            .filter_map(|r| codec.encode(r).ok())
            .collect();
        let dropped = records.len() - features.len();
        if dropped > 0 {
            debug!(dropped, "dropped records with unknown labels");
        }
        if features.is_empty() {
            return Err(ScorerError::EmptyBatch {
                reason: no_rows_reason(self.bundle),
            });
        }
        self.bundle.score_features(&features)
    }

    /// Parse and score CSV rows.
    ///
    /// # Errors
    ///
    /// Returns `EmptyBatch` if no row could be scored.
    pub fn run_rows(&self, rows: &[CsvRow]) -> Result<BatchOutcome> {
        let codec = self.bundle.codec();
        let parsed = parse_rows(rows, |label| codec.recognizes(label));
        if parsed.records.is_empty() {
            return Err(ScorerError::EmptyBatch {
                reason: no_rows_reason(self.bundle),
            });
        }

        let scores = self.run(&parsed.records)?;
        info!(
            rows = rows.len(),
            scored = scores.len(),
            unknown = parsed.unknown,
            malformed = parsed.malformed,
            "scored batch"
        );
        Ok(BatchOutcome {
            scores,
            row_indices: parsed.row_indices,
            unknown: parsed.unknown,
            malformed: parsed.malformed,
        })
    }
}

fn no_rows_reason<R: Reconstruct>(bundle: &ModelBundle<R>) -> String {
    format!(
        "no valid rows; the first column must be one of: {}",
        bundle.codec().map().labels().collect::<Vec<_>>().join(", ")
    )
}

/// Summary statistics of a scored batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Scored rows
    pub samples: usize,
    /// Mean reconstruction error
    pub mse_mean: f64,
    /// Population standard deviation of the error
    pub mse_std: f64,
    /// Threshold in use
    pub threshold: f64,
    /// Mean score
    pub score_mean: f64,
    /// Fraction of scores above 0.8
    pub above_08: f64,
    /// Fraction of scores above 0.5
    pub above_05: f64,
}

impl Summary {
    /// Compute from score records; failed records are ignored.
    #[must_use]
    pub fn from_scores(scores: &[ScoreRecord]) -> Self {
        let ok: Vec<&ScoreRecord> = scores.iter().filter(|s| s.ok).collect();
        let mse: Vec<f64> = ok.iter().filter_map(|s| s.mse).collect();
        let score: Vec<f64> = ok.iter().filter_map(|s| s.score).collect();
        let (mse_mean, mse_std) = mean_std(&mse);
        let (score_mean, _) = mean_std(&score);
        let fraction = |cut: f64| {
            if score.is_empty() {
                0.0
            } else {
                score.iter().filter(|s| **s > cut).count() as f64 / score.len() as f64
            }
        };
        Self {
            samples: ok.len(),
            mse_mean,
            mse_std,
            threshold: ok.first().and_then(|s| s.threshold).unwrap_or(0.0),
            score_mean,
            above_08: fraction(0.8),
            above_05: fraction(0.5),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Samples={}  MSE mean={:.6} std={:.6}  thr={:.6}",
            self.samples, self.mse_mean, self.mse_std, self.threshold
        )?;
        write!(
            f,
            "Score mean={:.4}  >0.8={:.2}%  >0.5={:.2}%",
            self.score_mean,
            self.above_08 * 100.0,
            self.above_05 * 100.0
        )
    }
}
