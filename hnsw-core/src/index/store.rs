use crate::dataset::Rows;
use crate::error::{IndexError, Result};
use hnsw_format::{decode_raw_vectors, encode_raw_vectors};

/// Owner of the raw vector payload: one row-major arena of `count * dim` floats.
///
/// Row index is node identity. Rows are only ever appended; replacing
/// content means building a new store.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dim: usize,
    count: usize,
    arena: Vec<f32>,
}

impl VectorStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            count: 0,
            arena: Vec::new(),
        }
    }

    /// Rebuilds a store from a `RAW_VECTORS` blob.
    pub fn from_bytes(dim: usize, count: usize, bytes: &[u8]) -> Result<Self> {
        let arena = decode_raw_vectors(bytes, dim, count)?;
        Ok(Self { dim, count, arena })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline(always)]
    pub fn row(&self, id: usize) -> &[f32] {
        let start = id * self.dim;
        &self.arena[start..start + self.dim]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.arena
    }

    /// Little-endian payload for the `RAW_VECTORS` blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_raw_vectors(&self.arena)
    }

    /// Reserves room for `rows` more vectors without touching existing rows.
    pub(crate) fn reserve(&mut self, rows: usize) -> Result<()> {
        self.arena
            .try_reserve(rows * self.dim)
            .map_err(IndexError::resource("reserving vector storage"))
    }

    /// Appends validated rows, returning the id of the first new row.
    pub(crate) fn append(&mut self, rows: &Rows<'_>) -> Result<usize> {
        if rows.dim != self.dim {
            return Err(IndexError::DimensionMismatch {
                context: "vector store",
                expected: self.dim as i64,
                actual: rows.dim as i64,
            });
        }
        self.reserve(rows.len())?;

        let first = self.count;
        self.arena.extend_from_slice(rows.data);
        self.count += rows.len();
        Ok(first)
    }

    /// Drops rows from `count` on. Used to undo a partially applied append.
    pub(crate) fn truncate(&mut self, count: usize) {
        if count < self.count {
            self.count = count;
            self.arena.truncate(count * self.dim);
        }
    }
}
