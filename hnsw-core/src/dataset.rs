//! Boundary types exchanged with callers: input datasets and query results.

use crate::error::{IndexError, Result};
use hnsw_format::encode_raw_vectors;

/// Sentinel id of an unfilled result slot.
pub const SENTINEL_ID: i64 = -1;

/// A borrowed batch of row-major `f32` vectors.
///
/// Mirrors the `DIM` / `ROWS` / `TENSOR` fields of the caller's dataset.
/// `rows` may be lowered after construction to expose only a prefix of the
/// tensor, as harnesses do when shrinking a dataset in place.
#[derive(Debug, Clone, Copy)]
pub struct Dataset<'a> {
    dim: i64,
    rows: i64,
    tensor: &'a [f32],
}

impl<'a> Dataset<'a> {
    pub fn new(dim: i64, rows: i64, tensor: &'a [f32]) -> Self {
        Self { dim, rows, tensor }
    }

    /// Dataset covering the whole tensor. `dim` must be positive.
    pub fn from_tensor(dim: usize, tensor: &'a [f32]) -> Self {
        let rows = if dim == 0 { 0 } else { tensor.len() / dim };
        Self::new(dim as i64, rows as i64, tensor)
    }

    pub fn dim(&self) -> i64 {
        self.dim
    }

    pub fn rows(&self) -> i64 {
        self.rows
    }

    pub fn tensor(&self) -> &'a [f32] {
        self.tensor
    }

    pub fn set_rows(&mut self, rows: i64) {
        self.rows = rows;
    }

    pub fn with_rows(mut self, rows: i64) -> Self {
        self.rows = rows;
        self
    }

    /// Checks the dataset against the index dimension and returns the
    /// in-bounds row-major slice.
    pub(crate) fn checked(&self, context: &'static str, expected_dim: i64) -> Result<Rows<'a>> {
        if self.dim != expected_dim {
            return Err(IndexError::DimensionMismatch {
                context,
                expected: expected_dim,
                actual: self.dim,
            });
        }
        if self.dim <= 0 {
            return Err(IndexError::invalid("dim", self.dim));
        }
        if self.rows < 0 {
            return Err(IndexError::invalid("rows", self.rows));
        }

        let dim = self.dim as usize;
        let needed = (self.rows as u64).saturating_mul(dim as u64);
        if (self.tensor.len() as u64) < needed {
            return Err(IndexError::ShapeMismatch {
                field: "tensor",
                expected: needed,
                actual: self.tensor.len() as u64,
            });
        }

        Ok(Rows {
            dim,
            data: &self.tensor[..needed as usize],
        })
    }

    /// The `RAW_VECTORS` payload of this dataset's visible rows, for callers
    /// that keep the raw vectors outside the index.
    pub fn raw_vectors_blob(&self) -> Vec<u8> {
        let dim = self.dim.max(0) as usize;
        let rows = self.rows.max(0) as usize;
        let end = dim.saturating_mul(rows).min(self.tensor.len());
        encode_raw_vectors(&self.tensor[..end])
    }
}

/// Validated view over the rows of a [`Dataset`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Rows<'a> {
    pub dim: usize,
    pub data: &'a [f32],
}

impl<'a> Rows<'a> {
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn row(&self, i: usize) -> &'a [f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

/// Result of a batch query: `nq` rows of `k` `(id, distance)` slots.
///
/// Each row is ordered closest first: increasing distance for L2,
/// decreasing similarity for inner product. Slots without a match carry
/// [`SENTINEL_ID`] and a distance that sorts after every real hit.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    nq: usize,
    k: usize,
    ids: Vec<i64>,
    distances: Vec<f32>,
}

impl QueryResult {
    pub(crate) fn padded(nq: usize, k: usize, sentinel_distance: f32) -> Self {
        Self {
            nq,
            k,
            ids: vec![SENTINEL_ID; nq * k],
            distances: vec![sentinel_distance; nq * k],
        }
    }

    pub(crate) fn slots_mut(&mut self) -> (&mut [i64], &mut [f32]) {
        (&mut self.ids, &mut self.distances)
    }

    pub fn nq(&self) -> usize {
        self.nq
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// All ids, row-major (`nq * k`).
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// All distances, parallel to [`QueryResult::ids`].
    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    pub fn row_ids(&self, row: usize) -> &[i64] {
        &self.ids[row * self.k..(row + 1) * self.k]
    }

    pub fn row_distances(&self, row: usize) -> &[f32] {
        &self.distances[row * self.k..(row + 1) * self.k]
    }

    /// Number of non-sentinel slots in `row`.
    pub fn valid_in_row(&self, row: usize) -> usize {
        self.row_ids(row).iter().filter(|&&id| id != SENTINEL_ID).count()
    }

    pub fn into_parts(self) -> (Vec<i64>, Vec<f32>) {
        (self.ids, self.distances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_checked_validates_shape() {
        let data = vec![0.0f32; 12];
        let ds = Dataset::new(4, 3, &data);
        let rows = ds.checked("train", 4).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.row(2).len(), 4);

        let err = ds.checked("train", 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("expected 8, got 4"));

        let err = ds.with_rows(4).checked("train", 4).unwrap_err();
        assert!(matches!(err, IndexError::ShapeMismatch { expected: 16, actual: 12, .. }));
    }

    #[test]
    fn test_truncated_rows_limit_the_view() {
        let data: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let mut ds = Dataset::from_tensor(2, &data);
        assert_eq!(ds.rows(), 10);

        ds.set_rows(3);
        let rows = ds.checked("train", 2).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.row(2), &[4.0, 5.0]);
        assert_eq!(ds.raw_vectors_blob().len(), 3 * 2 * 4);
    }

    #[test]
    fn test_oversized_row_count_clamps_blob() {
        let data = vec![1.0f32; 8];
        let ds = Dataset::new(4, i64::MAX, &data);
        assert_eq!(ds.raw_vectors_blob().len(), 8 * 4);
    }

    #[test]
    fn test_result_rows() {
        let mut result = QueryResult::padded(2, 3, f32::INFINITY);
        {
            let (ids, distances) = result.slots_mut();
            ids[3] = 7;
            distances[3] = 0.5;
        }
        assert_eq!(result.row_ids(1), &[7, SENTINEL_ID, SENTINEL_ID]);
        assert_eq!(result.valid_in_row(0), 0);
        assert_eq!(result.valid_in_row(1), 1);
        assert_eq!(result.row_distances(1)[0], 0.5);
    }
}
