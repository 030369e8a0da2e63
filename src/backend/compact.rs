//! Compact inference graph backend.
//!
//! A size-constrained copy of the dense autoencoder: weights are stored as
//! int8 with one symmetric scale per tensor, activations run in f32. The graph
//! declares an input shape of `[batch, width]`; a [`Session`] resizes the
//! batch dimension to whatever it is fed, the way an embedded interpreter
//! resizes its input tensor before invoking.
//!
//! Large inputs are processed in chunks of [`DEFAULT_BATCH_ROWS`] rows to
//! bound peak memory. Rows never interact, so chunking does not change any
//! per-row result.

use super::dense::DenseAutoencoder;
use super::Reconstruct;
use crate::container::{self, PayloadReader, PayloadWriter, TensorRecord};
use crate::error::{Result, ScorerError};
use std::path::Path;

/// Rows per internal chunk.
pub const DEFAULT_BATCH_ROWS: usize = 128;

/// Layer activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Pass-through
    Identity,
    /// max(0, x)
    Relu,
}

impl Activation {
    fn code(self) -> u8 {
        match self {
            Self::Identity => 0,
            Self::Relu => 1,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Identity),
            1 => Ok(Self::Relu),
            other => Err(ScorerError::invalid_format(format!(
                "unknown activation code {other}"
            ))),
        }
    }

    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Identity => x,
            Self::Relu => x.max(0.0),
        }
    }
}

/// Fully connected layer with int8 weights.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedLinear {
    in_dim: usize,
    out_dim: usize,
    weights: Vec<i8>,
    scale: f32,
    bias: Vec<f32>,
    activation: Activation,
}

impl QuantizedLinear {
    /// Quantize row-major `out_dim x in_dim` weights symmetrically to int8.
    #[must_use]
    pub fn quantize(
        weights: &[f64],
        bias: &[f64],
        in_dim: usize,
        out_dim: usize,
        activation: Activation,
    ) -> Self {
        let max_abs = weights.iter().fold(0.0f64, |acc, w| acc.max(w.abs()));
        let scale = if max_abs > 0.0 { max_abs / 127.0 } else { 1.0 };
        let weights = weights
            .iter()
            .map(|w| (w / scale).round().clamp(-127.0, 127.0) as i8)
            .collect();
        Self {
            in_dim,
            out_dim,
            weights,
            scale: scale as f32,
            bias: bias.iter().map(|b| *b as f32).collect(),
            activation,
        }
    }

    fn forward(&self, input: &[f32], output: &mut [f32]) {
        for ((o, row), b) in output
            .iter_mut()
            .zip(self.weights.chunks_exact(self.in_dim))
            .zip(&self.bias)
        {
            let acc: f32 = row
                .iter()
                .zip(input)
                .map(|(w, x)| f32::from(*w) * x)
                .sum();
            *o = self.activation.apply(acc * self.scale + b);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.in_dim == 0 || self.out_dim == 0 {
            return Err(ScorerError::invalid_format("compact layer has zero width"));
        }
        if self.weights.len() != self.in_dim * self.out_dim || self.bias.len() != self.out_dim {
            return Err(ScorerError::invalid_format(format!(
                "compact layer {}x{} has {} weights and {} biases",
                self.out_dim,
                self.in_dim,
                self.weights.len(),
                self.bias.len()
            )));
        }
        Ok(())
    }
}

/// Quantized feed-forward graph.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactGraph {
    input_width: usize,
    layers: Vec<QuantizedLinear>,
    batch_rows: usize,
}

impl CompactGraph {
    /// Assemble a graph, checking that layer widths chain and that the last
    /// layer reconstructs the full input width.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for an empty graph or inconsistent layers, and
    /// `ShapeMismatch` if the output width differs from the input width.
    pub fn new(input_width: usize, layers: Vec<QuantizedLinear>) -> Result<Self> {
        if layers.is_empty() {
            return Err(ScorerError::invalid_format("compact graph has no layers"));
        }
        let mut width = input_width;
        for (i, layer) in layers.iter().enumerate() {
            layer.validate()?;
            if layer.in_dim != width {
                return Err(ScorerError::invalid_format(format!(
                    "layer {i} expects width {}, previous layer produces {width}",
                    layer.in_dim
                )));
            }
            width = layer.out_dim;
        }
        if width != input_width {
            return Err(ScorerError::shape_mismatch((1, input_width), (1, width)));
        }
        Ok(Self {
            input_width,
            layers,
            batch_rows: DEFAULT_BATCH_ROWS,
        })
    }

    /// Quantize a trained dense autoencoder.
    #[must_use]
    pub fn from_dense(model: &DenseAutoencoder) -> Self {
        let n = model.input_dim();
        let h = model.hidden_dim();
        let (w1, b1) = model.encoder();
        let (w2, b2) = model.decoder();
        Self {
            input_width: n,
            layers: vec![
                QuantizedLinear::quantize(w1, b1, n, h, Activation::Relu),
                QuantizedLinear::quantize(w2, b2, h, model.output_dim(), Activation::Identity),
            ],
            batch_rows: DEFAULT_BATCH_ROWS,
        }
    }

    /// Override the internal chunk size.
    #[must_use]
    pub fn with_batch_rows(mut self, rows: usize) -> Self {
        self.batch_rows = rows.max(1);
        self
    }

    /// Rows per internal chunk.
    #[must_use]
    pub fn batch_rows(&self) -> usize {
        self.batch_rows
    }

    /// Declared input shape with the batch dimension set to 1.
    #[must_use]
    pub fn declared_input_shape(&self) -> [usize; 2] {
        [1, self.input_width]
    }

    /// Number of stored weights and biases.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.len() + l.bias.len())
            .sum()
    }

    /// Open an inference session with batch size 1.
    #[must_use]
    pub fn session(&self) -> Session<'_> {
        let mut session = Session {
            graph: self,
            batch: 0,
            input: Vec::new(),
            output: Vec::new(),
        };
        session.resize_input(1);
        session
    }

    /// Serialize into a sealed container.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = PayloadWriter::new();
        writer.put_u32(self.input_width as u32);
        writer.put_u32(self.layers.len() as u32);
        for (i, layer) in self.layers.iter().enumerate() {
            writer.put_u8(layer.activation.code());
            writer.put_tensor(&TensorRecord::from_i8(
                format!("layer{i}.weight"),
                vec![layer.out_dim, layer.in_dim],
                &layer.weights,
                layer.scale,
            ));
            writer.put_tensor(&TensorRecord::from_f32(
                format!("layer{i}.bias"),
                vec![layer.out_dim],
                &layer.bias,
            ));
        }
        container::seal(&writer.into_bytes(), true)
    }

    /// Parse a sealed container.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for corrupted or inconsistent data.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (_, payload) = container::open(bytes)?;
        let mut reader = PayloadReader::new(payload);

        let input_width = reader.u32()? as usize;
        let count = reader.u32()? as usize;
        let mut layers = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            let activation = Activation::from_code(reader.u8()?)?;
            let weight = reader.tensor()?;
            let bias = reader.tensor()?;
            let &[out_dim, in_dim] = weight.shape.as_slice() else {
                return Err(ScorerError::invalid_format(format!(
                    "tensor '{}' must be rank 2, got shape {:?}",
                    weight.name, weight.shape
                )));
            };
            layers.push(QuantizedLinear {
                in_dim,
                out_dim,
                weights: weight.to_i8()?,
                scale: weight.scale,
                bias: bias.to_f32()?,
                activation,
            });
        }
        if !reader.is_exhausted() {
            return Err(ScorerError::invalid_format("trailing bytes after last layer"));
        }

        Self::new(input_width, layers)
    }

    /// Write to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Read from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScorerError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }
        Self::from_bytes(&std::fs::read(path)?)
    }
}

impl Reconstruct for CompactGraph {
    fn input_dim(&self) -> usize {
        self.input_width
    }

    fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.out_dim)
    }

    fn reconstruct_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        if let Some(row) = rows.iter().find(|r| r.len() != self.input_width) {
            return Err(ScorerError::DimensionMismatch {
                expected: self.input_width,
                actual: row.len(),
            });
        }

        let width = self.output_dim();
        let mut session = self.session();
        let mut out = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(self.batch_rows) {
            session.resize_input(chunk.len());
            let flat: Vec<f32> = chunk
                .iter()
                .flat_map(|row| row.iter().map(|v| *v as f32))
                .collect();
            session.set_input(&flat)?;
            session.invoke();
            out.extend(
                session
                    .output()
                    .chunks_exact(width)
                    .map(|r| r.iter().map(|v| f64::from(*v)).collect()),
            );
        }
        Ok(out)
    }
}

/// Mutable execution state for one graph: input and output tensors sized to
/// the current batch.
#[derive(Debug)]
pub struct Session<'g> {
    graph: &'g CompactGraph,
    batch: usize,
    input: Vec<f32>,
    output: Vec<f32>,
}

impl Session<'_> {
    /// Current input shape `[batch, width]`.
    #[must_use]
    pub fn input_shape(&self) -> [usize; 2] {
        [self.batch, self.graph.input_width]
    }

    /// Resize the batch dimension and reallocate tensors.
    pub fn resize_input(&mut self, batch: usize) {
        self.batch = batch;
        self.input.clear();
        self.input.resize(batch * self.graph.input_width, 0.0);
        self.output.clear();
        self.output.resize(batch * self.graph.output_dim(), 0.0);
    }

    /// Copy a flattened `[batch, width]` tensor into the input.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the length disagrees with the current
    /// input shape.
    pub fn set_input(&mut self, data: &[f32]) -> Result<()> {
        if data.len() != self.input.len() {
            return Err(ScorerError::DimensionMismatch {
                expected: self.input.len(),
                actual: data.len(),
            });
        }
        self.input.copy_from_slice(data);
        Ok(())
    }

    /// Run every layer over the current batch.
    pub fn invoke(&mut self) {
        let width_in = self.graph.input_width;
        let width_out = self.graph.output_dim();
        for (x, y) in self
            .input
            .chunks_exact(width_in)
            .zip(self.output.chunks_exact_mut(width_out))
        {
            let mut current = x.to_vec();
            for layer in &self.graph.layers {
                let mut next = vec![0.0f32; layer.out_dim];
                layer.forward(&current, &mut next);
                current = next;
            }
            y.copy_from_slice(&current);
        }
    }

    /// Output tensor, flattened `[batch, width]`.
    #[must_use]
    pub fn output(&self) -> &[f32] {
        &self.output
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::scorer::reconstruction_error;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn trained_pair() -> (DenseAutoencoder, Vec<Vec<f64>>) {
        let mut rng = StdRng::seed_from_u64(11);
        let model = DenseAutoencoder::new(10, 8, &mut rng);
        let rows = (0..300)
            .map(|_| (0..10).map(|_| rng.gen_range(-2.0..2.0)).collect())
            .collect();
        (model, rows)
    }

    #[test]
    fn test_quantize_range() {
        let layer = QuantizedLinear::quantize(
            &[-2.0, 0.0, 0.5, 2.0],
            &[0.0, 0.0],
            2,
            2,
            Activation::Identity,
        );
        assert_eq!(layer.weights, vec![-127, 0, 32, 127]);
        assert!((layer.scale - 2.0 / 127.0).abs() < 1e-7);
    }

    #[test]
    fn test_from_dense_tracks_dense_output() {
        let (dense, rows) = trained_pair();
        let graph = CompactGraph::from_dense(&dense);
        let exact = dense.reconstruct_batch(&rows).unwrap();
        let approx = graph.reconstruct_batch(&rows).unwrap();
        for (e, a) in exact.iter().zip(&approx) {
            let drift = reconstruction_error(e, a).unwrap();
            assert!(drift < 1e-2, "quantization drift {drift}");
        }
    }

    #[test]
    fn test_chunking_does_not_change_results() {
        let (dense, rows) = trained_pair();
        let big = CompactGraph::from_dense(&dense);
        let small = big.clone().with_batch_rows(7);
        let single = big.clone().with_batch_rows(1);
        let a = big.reconstruct_batch(&rows).unwrap();
        assert_eq!(a, small.reconstruct_batch(&rows).unwrap());
        assert_eq!(a, single.reconstruct_batch(&rows).unwrap());
        assert_eq!(a.len(), 300);
    }

    #[test]
    fn test_width_validated_before_invoke() {
        let (dense, _) = trained_pair();
        let graph = CompactGraph::from_dense(&dense);
        let err = graph.reconstruct_batch(&[vec![0.0; 9]]).unwrap_err();
        assert!(matches!(
            err,
            ScorerError::DimensionMismatch {
                expected: 10,
                actual: 9
            }
        ));
    }

    #[test]
    fn test_session_resize() {
        let (dense, _) = trained_pair();
        let graph = CompactGraph::from_dense(&dense);
        let mut session = graph.session();
        assert_eq!(session.input_shape(), [1, 10]);
        session.resize_input(5);
        assert_eq!(session.input_shape(), [5, 10]);
        assert!(session.set_input(&[0.0; 10]).is_err());
        session.set_input(&[0.0; 50]).unwrap();
        session.invoke();
        assert_eq!(session.output().len(), 50);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let (dense, rows) = trained_pair();
        let graph = CompactGraph::from_dense(&dense);
        let bytes = graph.to_bytes();
        assert_eq!(&bytes[0..4], b"TAEG");
        let restored = CompactGraph::from_bytes(&bytes).unwrap();
        assert_eq!(restored, graph);
        assert_eq!(
            restored.reconstruct_batch(&rows[..3]).unwrap(),
            graph.reconstruct_batch(&rows[..3]).unwrap()
        );
    }

    #[test]
    fn test_new_rejects_broken_chain() {
        let a = QuantizedLinear::quantize(&[1.0; 6], &[0.0; 2], 3, 2, Activation::Relu);
        let b = QuantizedLinear::quantize(&[1.0; 12], &[0.0; 3], 4, 3, Activation::Identity);
        let err = CompactGraph::new(3, vec![a, b]).unwrap_err();
        assert!(err.to_string().contains("layer 1"));
    }

    #[test]
    fn test_new_rejects_partial_reconstruction() {
        let encode = QuantizedLinear::quantize(&[1.0; 6], &[0.0; 2], 3, 2, Activation::Relu);
        let decode = QuantizedLinear::quantize(&[1.0; 4], &[0.0; 2], 2, 2, Activation::Identity);
        let err = CompactGraph::new(3, vec![encode, decode]).unwrap_err();
        assert!(matches!(err, ScorerError::ShapeMismatch { .. }));

        let encode = QuantizedLinear::quantize(&[1.0; 6], &[0.0; 2], 3, 2, Activation::Relu);
        let decode = QuantizedLinear::quantize(&[1.0; 6], &[0.0; 3], 2, 3, Activation::Identity);
        let graph = CompactGraph::new(3, vec![encode, decode]).unwrap();
        assert_eq!(graph.output_dim(), 3);
    }
}
