//! Full-precision autoencoder backend.
//!
//! ```text
//! input [n] ──▶ Dense [max(8, n/2)] ReLU ──▶ Dense [n] linear ──▶ reconstruction
//! ```
//!
//! Trained with mini-batch Adam on mean squared reconstruction error and
//! persisted through the `.apr` format.

use super::Reconstruct;
use crate::aprender_integration::{load_model, save_model};
use crate::error::{Result, ScorerError};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hidden width used when none is configured.
#[must_use]
pub fn default_hidden_dim(input_dim: usize) -> usize {
    (input_dim / 2).max(8)
}

/// Optimizer settings for [`DenseAutoencoder::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    /// Passes over the training rows
    pub epochs: usize,
    /// Rows per gradient step
    pub batch_size: usize,
    /// Adam step size
    pub learning_rate: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 64,
            learning_rate: 1e-3,
        }
    }
}

/// Two-layer dense autoencoder in f64.
///
/// Weights are row-major: `w1` is `hidden_dim x input_dim`, `w2` is
/// `output_dim x hidden_dim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseAutoencoder {
    input_dim: usize,
    hidden_dim: usize,
    output_dim: usize,
    w1: Vec<f64>,
    b1: Vec<f64>,
    w2: Vec<f64>,
    b2: Vec<f64>,
}

impl DenseAutoencoder {
    /// Glorot-uniform initialized autoencoder reconstructing `input_dim` features.
    #[must_use]
    pub fn new<R: Rng>(input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        let glorot = |fan_in: usize, fan_out: usize, rng: &mut R| -> Vec<f64> {
            let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
            (0..fan_in * fan_out)
                .map(|_| rng.gen_range(-limit..=limit))
                .collect()
        };
        Self {
            input_dim,
            hidden_dim,
            output_dim: input_dim,
            w1: glorot(input_dim, hidden_dim, rng),
            b1: vec![0.0; hidden_dim],
            w2: glorot(hidden_dim, input_dim, rng),
            b2: vec![0.0; input_dim],
        }
    }

    /// Build from explicit weights.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if any weight length disagrees with the
    /// declared dimensions.
    pub fn from_weights(
        input_dim: usize,
        hidden_dim: usize,
        output_dim: usize,
        (w1, b1): (Vec<f64>, Vec<f64>),
        (w2, b2): (Vec<f64>, Vec<f64>),
    ) -> Result<Self> {
        let model = Self {
            input_dim,
            hidden_dim,
            output_dim,
            w1,
            b1,
            w2,
            b2,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        let checks = [
            ("w1", self.w1.len(), self.hidden_dim * self.input_dim),
            ("b1", self.b1.len(), self.hidden_dim),
            ("w2", self.w2.len(), self.output_dim * self.hidden_dim),
            ("b2", self.b2.len(), self.output_dim),
        ];
        for (name, actual, expected) in checks {
            if actual != expected {
                return Err(ScorerError::invalid_format(format!(
                    "dense layer {name} has {actual} values, expected {expected}"
                )));
            }
        }
        if self.input_dim == 0 || self.hidden_dim == 0 {
            return Err(ScorerError::invalid_format("dense model has a zero-width layer"));
        }
        Ok(())
    }

    /// Hidden layer width.
    #[must_use]
    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Encoder weights and biases.
    #[must_use]
    pub fn encoder(&self) -> (&[f64], &[f64]) {
        (&self.w1, &self.b1)
    }

    /// Decoder weights and biases.
    #[must_use]
    pub fn decoder(&self) -> (&[f64], &[f64]) {
        (&self.w2, &self.b2)
    }

    /// Total trainable parameters.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.w1.len() + self.b1.len() + self.w2.len() + self.b2.len()
    }

    /// Returns `(hidden pre-activation, reconstruction)`.
    fn forward(&self, x: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let pre: Vec<f64> = self
            .w1
            .chunks_exact(self.input_dim)
            .zip(&self.b1)
            .map(|(row, b)| b + row.iter().zip(x).map(|(w, x)| w * x).sum::<f64>())
            .collect();
        let out = self
            .w2
            .chunks_exact(self.hidden_dim)
            .zip(&self.b2)
            .map(|(row, b)| {
                b + row
                    .iter()
                    .zip(&pre)
                    .map(|(w, h)| w * h.max(0.0))
                    .sum::<f64>()
            })
            .collect();
        (pre, out)
    }

    /// Train on standardized rows to reconstruct themselves.
    ///
    /// Returns the mean squared error of each epoch.
    ///
    /// # Errors
    ///
    /// Returns `NoData` for empty input, `ShapeMismatch` if the model does not
    /// reconstruct its own width, and `DimensionMismatch` for rows of the
    /// wrong width.
    pub fn fit<R: Rng>(
        &mut self,
        rows: &[Vec<f64>],
        options: &FitOptions,
        rng: &mut R,
    ) -> Result<Vec<f64>> {
        if rows.is_empty() {
            return Err(ScorerError::NoData {
                reason: "cannot fit a model on zero rows".to_string(),
            });
        }
        if self.output_dim != self.input_dim {
            return Err(ScorerError::shape_mismatch(
                (rows.len(), self.input_dim),
                (rows.len(), self.output_dim),
            ));
        }
        if let Some(row) = rows.iter().find(|r| r.len() != self.input_dim) {
            return Err(ScorerError::DimensionMismatch {
                expected: self.input_dim,
                actual: row.len(),
            });
        }

        let n = self.input_dim;
        let h = self.hidden_dim;
        let batch_size = options.batch_size.max(1);
        let mut adam = [
            AdamSlot::new(self.w1.len()),
            AdamSlot::new(self.b1.len()),
            AdamSlot::new(self.w2.len()),
            AdamSlot::new(self.b2.len()),
        ];
        let mut order: Vec<usize> = (0..rows.len()).collect();
        let mut step = 0i32;
        let mut losses = Vec::with_capacity(options.epochs);

        for _ in 0..options.epochs {
            order.shuffle(rng);
            let mut epoch_sq = 0.0;

            for batch in order.chunks(batch_size) {
                let mut g_w1 = vec![0.0; self.w1.len()];
                let mut g_b1 = vec![0.0; h];
                let mut g_w2 = vec![0.0; self.w2.len()];
                let mut g_b2 = vec![0.0; n];
                let norm = 2.0 / (batch.len() * n) as f64;

                for &idx in batch {
                    let x = &rows[idx];
                    let (pre, out) = self.forward(x);
                    let d_out: Vec<f64> = out
                        .iter()
                        .zip(x)
                        .map(|(y, t)| {
                            epoch_sq += (y - t) * (y - t);
                            norm * (y - t)
                        })
                        .collect();

                    let mut d_hidden = vec![0.0; h];
                    for (o, d) in d_out.iter().enumerate() {
                        g_b2[o] += d;
                        for j in 0..h {
                            g_w2[o * h + j] += d * pre[j].max(0.0);
                            d_hidden[j] += d * self.w2[o * h + j];
                        }
                    }
                    for j in 0..h {
                        if pre[j] <= 0.0 {
                            continue;
                        }
                        g_b1[j] += d_hidden[j];
                        for (i, xi) in x.iter().enumerate() {
                            g_w1[j * n + i] += d_hidden[j] * xi;
                        }
                    }
                }

                step += 1;
                let lr = options.learning_rate;
                adam[0].step(&mut self.w1, &g_w1, lr, step);
                adam[1].step(&mut self.b1, &g_b1, lr, step);
                adam[2].step(&mut self.w2, &g_w2, lr, step);
                adam[3].step(&mut self.b2, &g_b2, lr, step);
            }

            losses.push(epoch_sq / (rows.len() * n) as f64);
        }

        Ok(losses)
    }

    /// Save as an `.apr` file.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let description = format!(
            "touch autoencoder {}->{}->{}",
            self.input_dim, self.hidden_dim, self.output_dim
        );
        save_model(self, path, "touch-ae-dense", &description)
    }

    /// Load from an `.apr` file and validate layer shapes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or inconsistent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let model: Self = load_model(path)?;
        model.validate()?;
        Ok(model)
    }
}

impl Reconstruct for DenseAutoencoder {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn reconstruct_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        if self.output_dim != self.input_dim {
            return Err(ScorerError::shape_mismatch(
                (rows.len(), self.input_dim),
                (rows.len(), self.output_dim),
            ));
        }
        rows.iter()
            .map(|row| {
                if row.len() != self.input_dim {
                    return Err(ScorerError::DimensionMismatch {
                        expected: self.input_dim,
                        actual: row.len(),
                    });
                }
                Ok(self.forward(row).1)
            })
            .collect()
    }
}

/// Adam moment estimates for one parameter tensor.
#[derive(Debug, Clone)]
struct AdamSlot {
    m: Vec<f64>,
    v: Vec<f64>,
}

impl AdamSlot {
    const BETA1: f64 = 0.9;
    const BETA2: f64 = 0.999;
    const EPSILON: f64 = 1e-7;

    fn new(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }

    fn step(&mut self, params: &mut [f64], grads: &[f64], lr: f64, t: i32) {
        let c1 = 1.0 - Self::BETA1.powi(t);
        let c2 = 1.0 - Self::BETA2.powi(t);
        for ((p, g), (m, v)) in params
            .iter_mut()
            .zip(grads)
            .zip(self.m.iter_mut().zip(self.v.iter_mut()))
        {
            *m = Self::BETA1 * *m + (1.0 - Self::BETA1) * g;
            *v = Self::BETA2 * *v + (1.0 - Self::BETA2) * g * g;
            *p -= lr * (*m / c1) / ((*v / c2).sqrt() + Self::EPSILON);
        }
    }
}
