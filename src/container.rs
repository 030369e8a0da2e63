//! Binary container for the compact inference graph.
//!
//! Layout: a fixed 32-byte header followed by a payload made of
//! length-prefixed tensor records.
//!
//! ```text
//! [0-3]   magic "TAEG"
//! [4-5]   version (major, minor)
//! [6]     flags (bit 0: int8 quantized weights)
//! [7]     reserved
//! [8-11]  payload size (u32 LE)
//! [12-27] first 16 bytes of the BLAKE3 digest of the payload
//! [28-31] reserved
//! ```

use crate::error::{Result, ScorerError};

/// Container magic bytes.
pub const GRAPH_MAGIC: &[u8; 4] = b"TAEG";

/// Fixed header size.
pub const HEADER_SIZE: usize = 32;

/// Current format version.
pub const FORMAT_VERSION: (u8, u8) = (1, 0);

const FLAG_QUANTIZED: u8 = 0x01;
const DIGEST_LEN: usize = 16;

/// Parsed container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Format version
    pub version: (u8, u8),
    /// Whether weights are int8 quantized
    pub quantized: bool,
    /// Payload length in bytes
    pub payload_size: u32,
}

/// Element type of a stored tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 32-bit float
    F32,
    /// 8-bit signed integer
    I8,
}

impl DataType {
    /// Bytes per element.
    #[must_use]
    pub fn element_size(&self) -> usize {
        match self {
            Self::F32 => 4,
            Self::I8 => 1,
        }
    }

    fn code(self) -> u8 {
        match self {
            Self::F32 => 0,
            Self::I8 => 1,
        }
    }

    fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::F32),
            1 => Ok(Self::I8),
            other => Err(ScorerError::invalid_format(format!(
                "unknown tensor dtype code {other}"
            ))),
        }
    }
}

/// Named tensor with shape, dtype, a dequantization scale and raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorRecord {
    /// Tensor name
    pub name: String,
    /// Shape dimensions
    pub shape: Vec<usize>,
    /// Element type
    pub dtype: DataType,
    /// Multiplier applied on dequantization (1.0 for F32)
    pub scale: f32,
    /// Raw little-endian bytes
    pub data: Vec<u8>,
}

impl TensorRecord {
    /// F32 tensor from values.
    #[must_use]
    pub fn from_f32(name: impl Into<String>, shape: Vec<usize>, values: &[f32]) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype: DataType::F32,
            scale: 1.0,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    /// I8 tensor from quantized values and their scale.
    #[must_use]
    pub fn from_i8(name: impl Into<String>, shape: Vec<usize>, values: &[i8], scale: f32) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype: DataType::I8,
            scale,
            data: values.iter().map(|v| v.to_le_bytes()[0]).collect(),
        }
    }

    /// Number of elements implied by the shape.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Decode as f32 values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the dtype is not F32 or the byte length
    /// disagrees with the shape.
    pub fn to_f32(&self) -> Result<Vec<f32>> {
        self.check(DataType::F32)?;
        Ok(self
            .data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Decode as i8 values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the dtype is not I8 or the byte length
    /// disagrees with the shape.
    pub fn to_i8(&self) -> Result<Vec<i8>> {
        self.check(DataType::I8)?;
        Ok(self.data.iter().map(|b| i8::from_le_bytes([*b])).collect())
    }

    fn check(&self, expected: DataType) -> Result<()> {
        if self.dtype != expected {
            return Err(ScorerError::invalid_format(format!(
                "tensor '{}' has dtype {:?}, expected {:?}",
                self.name, self.dtype, expected
            )));
        }
        if self.data.len() != self.element_count() * self.dtype.element_size() {
            return Err(ScorerError::invalid_format(format!(
                "tensor '{}' holds {} bytes, shape {:?} needs {}",
                self.name,
                self.data.len(),
                self.shape,
                self.element_count() * self.dtype.element_size()
            )));
        }
        Ok(())
    }
}

/// Append-only payload writer.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    bytes: Vec<u8>,
}

impl PayloadWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a u8.
    pub fn put_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    /// Write a u32 (LE).
    pub fn put_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a tensor record.
    pub fn put_tensor(&mut self, tensor: &TensorRecord) {
        let name_bytes = tensor.name.as_bytes();
        self.put_u32(name_bytes.len() as u32);
        self.bytes.extend_from_slice(name_bytes);

        self.put_u8(tensor.dtype.code());

        self.put_u32(tensor.shape.len() as u32);
        for &dim in &tensor.shape {
            self.bytes.extend_from_slice(&(dim as u64).to_le_bytes());
        }

        self.bytes.extend_from_slice(&tensor.scale.to_le_bytes());

        self.bytes
            .extend_from_slice(&(tensor.data.len() as u64).to_le_bytes());
        self.bytes.extend_from_slice(&tensor.data);
    }

    /// Finish the payload.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Cursor over a payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    /// Read from the start of `bytes`.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                ScorerError::invalid_format(format!(
                    "payload truncated at byte {} (wanted {n} more)",
                    self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read a u8.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the payload is exhausted.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a u32 (LE).
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the payload is exhausted.
    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn usize(&mut self) -> Result<usize> {
        usize::try_from(self.u64()?)
            .map_err(|_| ScorerError::invalid_format("length does not fit in usize"))
    }

    /// Read a tensor record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for truncated or malformed records.
    pub fn tensor(&mut self) -> Result<TensorRecord> {
        let name_len = self.u32()? as usize;
        let name = std::str::from_utf8(self.take(name_len)?)
            .map_err(|_| ScorerError::invalid_format("tensor name is not UTF-8"))?
            .to_string();

        let dtype = DataType::from_code(self.u8()?)?;

        let rank = self.u32()? as usize;
        let mut shape = Vec::with_capacity(rank.min(8));
        for _ in 0..rank {
            shape.push(self.usize()?);
        }

        let s = self.take(4)?;
        let scale = f32::from_le_bytes([s[0], s[1], s[2], s[3]]);

        let data_len = self.usize()?;
        let data = self.take(data_len)?.to_vec();

        Ok(TensorRecord {
            name,
            shape,
            dtype,
            scale,
            data,
        })
    }

    /// Whether every byte has been consumed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

fn payload_digest(payload: &[u8]) -> [u8; DIGEST_LEN] {
    let hash = blake3::hash(payload);
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hash.as_bytes()[..DIGEST_LEN]);
    digest
}

/// Wrap a payload in a container.
#[must_use]
pub fn seal(payload: &[u8], quantized: bool) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());

    bytes.extend_from_slice(GRAPH_MAGIC);
    bytes.push(FORMAT_VERSION.0);
    bytes.push(FORMAT_VERSION.1);
    bytes.push(if quantized { FLAG_QUANTIZED } else { 0 });
    bytes.push(0);
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&payload_digest(payload));

    // Reserved bytes to reach HEADER_SIZE
    bytes.resize(HEADER_SIZE, 0);

    bytes.extend_from_slice(payload);
    bytes
}

/// Validate a container and return its header and payload.
///
/// # Errors
///
/// Returns `InvalidFormat` if:
/// - The bytes are too short to contain a header
/// - The magic bytes don't match
/// - The major version is unsupported
/// - The payload length or digest does not match the header
pub fn open(bytes: &[u8]) -> Result<(ContainerHeader, &[u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(ScorerError::invalid_format(format!(
            "data too short: {} bytes, minimum {} required",
            bytes.len(),
            HEADER_SIZE
        )));
    }

    if &bytes[0..4] != GRAPH_MAGIC {
        return Err(ScorerError::invalid_format(format!(
            "invalid magic bytes: expected TAEG, got {:?}",
            &bytes[0..4]
        )));
    }

    let version = (bytes[4], bytes[5]);
    if version.0 != FORMAT_VERSION.0 {
        return Err(ScorerError::invalid_format(format!(
            "unsupported graph format version {}.{}",
            version.0, version.1
        )));
    }

    let flags = bytes[6];
    let payload_size = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != payload_size as usize {
        return Err(ScorerError::invalid_format(format!(
            "payload is {} bytes, header declares {payload_size}",
            payload.len()
        )));
    }
    if bytes[12..12 + DIGEST_LEN] != payload_digest(payload) {
        return Err(ScorerError::invalid_format("payload digest mismatch"));
    }

    Ok((
        ContainerHeader {
            version,
            quantized: (flags & FLAG_QUANTIZED) != 0,
            payload_size,
        },
        payload,
    ))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let sealed = seal(&[1, 2, 3, 4], true);
        assert_eq!(&sealed[0..4], GRAPH_MAGIC);

        let (header, payload) = open(&sealed).unwrap();
        assert_eq!(header.version, (1, 0));
        assert!(header.quantized);
        assert_eq!(header.payload_size, 4);
        assert_eq!(payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_open_rejects_short_data() {
        let err = open(&[0u8; 10]).unwrap_err();
        assert!(err.to_string().contains("data too short"));
    }

    #[test]
    fn test_open_rejects_invalid_magic() {
        let mut bad = seal(&[], false);
        bad[0..4].copy_from_slice(b"XXXX");
        let err = open(&bad).unwrap_err();
        assert!(err.to_string().contains("invalid magic bytes"));
    }

    #[test]
    fn test_open_detects_tampering() {
        let mut sealed = seal(&[9; 64], false);
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        let err = open(&sealed).unwrap_err();
        assert!(err.to_string().contains("digest mismatch"));
    }

    #[test]
    fn test_tensor_roundtrip() {
        let weights = TensorRecord::from_i8("layer0.weight", vec![2, 3], &[-128, -1, 0, 1, 64, 127], 0.01);
        let bias = TensorRecord::from_f32("layer0.bias", vec![2], &[0.5, -0.25]);

        let mut writer = PayloadWriter::new();
        writer.put_u32(2);
        writer.put_tensor(&weights);
        writer.put_tensor(&bias);
        let payload = writer.into_bytes();

        let mut reader = PayloadReader::new(&payload);
        assert_eq!(reader.u32().unwrap(), 2);
        let w = reader.tensor().unwrap();
        let b = reader.tensor().unwrap();
        assert!(reader.is_exhausted());

        assert_eq!(w, weights);
        assert_eq!(w.to_i8().unwrap(), vec![-128, -1, 0, 1, 64, 127]);
        assert_eq!(b.to_f32().unwrap(), vec![0.5, -0.25]);
        assert!(b.to_i8().is_err());
    }

    #[test]
    fn test_reader_truncated() {
        let mut reader = PayloadReader::new(&[1, 0]);
        let err = reader.u32().unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }
}
