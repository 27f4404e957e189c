use crate::{FormatError, RAW_VECTORS};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Encodes a row-major `f32` buffer as little-endian bytes.
pub fn encode_raw_vectors(data: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * F32_BYTES);
    for value in data {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decodes a `RAW_VECTORS` blob, which must hold exactly `dim * count` floats.
pub fn decode_raw_vectors(bytes: &[u8], dim: usize, count: usize) -> Result<Vec<f32>, FormatError> {
    let expected = dim as u64 * count as u64 * F32_BYTES as u64;
    if bytes.len() as u64 != expected {
        return Err(FormatError::SizeMismatch {
            blob: RAW_VECTORS,
            expected,
            actual: bytes.len() as u64,
        });
    }

    Ok(bytes
        .chunks_exact(F32_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
