//! Feature codec: raw gesture records to fixed-order feature vectors.
//!
//! A raw record is one gesture label plus nine numeric measurements. The
//! codec replaces the label with its numeric code from a [`GestureMap`] and
//! produces a [`FeatureVector`] whose order is part of the artifact contract:
//!
//! ```text
//! [gesture_num, duration_ms, total_distance, avg_velocity, peak_velocity,
//!  avg_pressure, peak_pressure, path_deviation, direction_changes, jitter]
//! ```
//!
//! # Example
//!
//! ```
//! use touch_scorer::features::{FeatureCodec, GestureMap, RawRecord};
//!
//! let codec = FeatureCodec::new(GestureMap::default());
//! let record = RawRecord::new("SWIPE", [250.0, 137.1, 0.548, 0.622, 0.709, 0.988, 0.483, 0.0, 0.355]);
//! let features = codec.encode(&record).unwrap();
//! assert_eq!(features.as_slice()[0], 1.0);
//! assert_eq!(codec.decode(1.0, 1e-6).unwrap(), "SWIPE");
//! ```

use crate::error::{Result, ScorerError};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Number of numeric measurements in a raw record.
pub const MEASUREMENT_COUNT: usize = 9;

/// Width of an encoded feature vector (gesture code + measurements).
pub const FEATURE_DIM: usize = MEASUREMENT_COUNT + 1;

/// Feature names in vector order.
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "gesture_num",
    "duration_ms",
    "total_distance",
    "avg_velocity",
    "peak_velocity",
    "avg_pressure",
    "peak_pressure",
    "path_deviation",
    "direction_changes",
    "jitter",
];

/// Default tolerance for reverse (code to label) lookups.
pub const DEFAULT_DECODE_TOLERANCE: f64 = 1e-6;

/// Validated mapping from gesture label to numeric code.
///
/// Never empty, every code is finite, and no two codes lie within
/// [`DEFAULT_DECODE_TOLERANCE`] of each other, so `decode(encode(l)) == l`.
/// Keys are kept sorted so the serialized form is stable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GestureMap {
    codes: BTreeMap<String, f64>,
}

impl GestureMap {
    /// Build a map from label/code pairs.
    ///
    /// # Errors
    ///
    /// Returns `EmptyMapping` when no entries are given and `InvalidMapping`
    /// when a code is not finite, a label repeats, or two labels share a
    /// code.
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut codes = BTreeMap::new();
        for (label, code) in entries {
            let label = label.into();
            if !code.is_finite() {
                return Err(ScorerError::InvalidMapping {
                    reason: format!("value for '{label}' must be a finite number"),
                });
            }
            if codes.contains_key(&label) {
                return Err(ScorerError::InvalidMapping {
                    reason: format!("label '{label}' appears more than once"),
                });
            }
            codes.insert(label, code);
        }
        if codes.is_empty() {
            return Err(ScorerError::EmptyMapping);
        }

        let mut by_code: Vec<(&str, f64)> = codes.iter().map(|(l, c)| (l.as_str(), *c)).collect();
        by_code.sort_by(|a, b| a.1.total_cmp(&b.1));
        if let Some(pair) = by_code
            .windows(2)
            .find(|w| w[1].1 - w[0].1 <= DEFAULT_DECODE_TOLERANCE)
        {
            return Err(ScorerError::InvalidMapping {
                reason: format!(
                    "labels '{}' and '{}' share code {}",
                    pair[0].0, pair[1].0, pair[0].1
                ),
            });
        }
        Ok(Self { codes })
    }

    /// Parse a map from its JSON definition: a flat object of label to number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMapping` for non-object documents or non-numeric
    /// values, and `EmptyMapping` for `{}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).map_err(|e| ScorerError::InvalidMapping {
            reason: format!("not valid JSON: {e}"),
        })?;
        let Value::Object(object) = value else {
            return Err(ScorerError::InvalidMapping {
                reason: "gesture map JSON must be an object {label: value, ...}".to_string(),
            });
        };

        let mut entries = Vec::with_capacity(object.len());
        for (label, value) in object {
            let code = value.as_f64().ok_or_else(|| ScorerError::InvalidMapping {
                reason: format!("value for '{label}' must be numeric, got {value}"),
            })?;
            entries.push((label, code));
        }
        Self::new(entries)
    }

    /// Load a map from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScorerError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Serialize as pretty JSON with sorted keys.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Save the map to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Numeric code for a label, if known.
    #[must_use]
    pub fn code(&self, label: &str) -> Option<f64> {
        self.codes.get(label).copied()
    }

    /// Whether the label is part of the map.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.codes.contains_key(label)
    }

    /// Labels in sorted order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.codes.keys().map(String::as_str)
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Always false for a constructed map.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Labels from `labels` that are not part of the map.
    pub fn unknown_labels<'a, I>(&self, labels: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        labels
            .into_iter()
            .filter(|label| !self.contains(label))
            .map(str::to_string)
            .collect()
    }
}

impl Default for GestureMap {
    fn default() -> Self {
        let codes = [("TAP".to_string(), 0.0), ("SWIPE".to_string(), 1.0)]
            .into_iter()
            .collect();
        Self { codes }
    }
}

/// One gesture as captured: a label plus nine measurements in feature order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Gesture label, e.g. `"TAP"`.
    pub label: String,
    /// Measurements in `FEATURE_NAMES[1..]` order.
    pub measurements: [f64; MEASUREMENT_COUNT],
}

impl RawRecord {
    /// Create a record.
    #[must_use]
    pub fn new(label: impl Into<String>, measurements: [f64; MEASUREMENT_COUNT]) -> Self {
        Self {
            label: label.into(),
            measurements,
        }
    }

    /// Parse a record from the ten fields of a CSV row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if the row does not have exactly ten fields or
    /// a measurement is not a finite number.
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self> {
        if fields.len() != FEATURE_DIM {
            return Err(ScorerError::invalid_record(format!(
                "expected {FEATURE_DIM} fields, got {}",
                fields.len()
            )));
        }

        let mut measurements = [0.0; MEASUREMENT_COUNT];
        for (i, slot) in measurements.iter_mut().enumerate() {
            let raw = fields[i + 1].as_ref().trim();
            let value: f64 = raw.parse().map_err(|_| {
                ScorerError::invalid_record(format!(
                    "{} is not a number: '{raw}'",
                    FEATURE_NAMES[i + 1]
                ))
            })?;
            if !value.is_finite() {
                return Err(ScorerError::invalid_record(format!(
                    "{} is not finite",
                    FEATURE_NAMES[i + 1]
                )));
            }
            *slot = value;
        }

        Ok(Self::new(fields[0].as_ref().trim(), measurements))
    }
}

/// Encoded feature vector in contract order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_DIM]);

impl FeatureVector {
    /// Wrap an already ordered array.
    #[must_use]
    pub fn from_array(values: [f64; FEATURE_DIM]) -> Self {
        Self(values)
    }

    /// Values in contract order.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Copy into a row for matrix operations.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    /// Value of a named feature.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.0[i])
    }
}

/// Encoder/decoder that owns the label map.
#[derive(Debug, Clone, Default)]
pub struct FeatureCodec {
    map: GestureMap,
}

impl FeatureCodec {
    /// Create a codec over a validated map.
    #[must_use]
    pub fn new(map: GestureMap) -> Self {
        Self { map }
    }

    /// The label map.
    #[must_use]
    pub fn map(&self) -> &GestureMap {
        &self.map
    }

    /// Whether a record with this label can be encoded without a default.
    #[must_use]
    pub fn recognizes(&self, label: &str) -> bool {
        self.map.contains(label)
    }

    /// Encode a record.
    ///
    /// # Errors
    ///
    /// Returns `UnknownLabel` if the label is not in the map.
    pub fn encode(&self, record: &RawRecord) -> Result<FeatureVector> {
        self.encode_or(record, None)
    }

    /// Encode a record, substituting `default` for unknown labels when given.
    ///
    /// # Errors
    ///
    /// Returns `UnknownLabel` if the label is unknown and no default is given.
    pub fn encode_or(&self, record: &RawRecord, default: Option<f64>) -> Result<FeatureVector> {
        let code = self
            .map
            .code(&record.label)
            .or(default)
            .ok_or_else(|| ScorerError::UnknownLabel {
                label: record.label.clone(),
            })?;

        let mut values = [0.0; FEATURE_DIM];
        values[0] = code;
        values[1..].copy_from_slice(&record.measurements);
        Ok(FeatureVector(values))
    }

    /// Label whose code is nearest to `code`, if within `tol`.
    ///
    /// Diagnostic only; not used on the scoring path.
    ///
    /// # Errors
    ///
    /// Returns `NoMatch` if every code is further than `tol` away.
    pub fn decode(&self, code: f64, tol: f64) -> Result<&str> {
        self.map
            .codes
            .iter()
            .map(|(label, value)| (label, (value - code).abs()))
            .filter(|(_, distance)| *distance <= tol)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(label, _)| label.as_str())
            .ok_or(ScorerError::NoMatch { code, tol })
    }
}
