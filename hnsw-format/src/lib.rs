//! Persisted layout of an HNSW index.
//!
//! An index is persisted as a [`BinarySet`]: a named collection of opaque
//! buffers. Two names are defined:
//!
//! - [`TOPOLOGY`]: an rkyv archive of [`TopologyArchive`], the header plus
//!   per-node levels and per-layer neighbor lists.
//! - [`RAW_VECTORS`]: the row-major little-endian `f32` payload,
//!   `dim * count * 4` bytes. It is kept apart from the topology because the
//!   caller frequently holds the raw vectors in its own store already.

mod binary_set;
mod payload;
mod topology;

pub use binary_set::BinarySet;
pub use payload::{decode_raw_vectors, encode_raw_vectors};
pub use topology::{
    decode_topology, encode_topology, layer_capacity, NodeLinks, TopologyArchive, TopologyHeader,
};

use thiserror::Error;

/// Blob name of the graph topology (header + adjacency).
pub const TOPOLOGY: &str = "TOPOLOGY";

/// Blob name of the raw vector payload.
pub const RAW_VECTORS: &str = "RAW_VECTORS";

/// 'HNSW' in ASCII hex. First field of every topology header.
pub const TOPOLOGY_MAGIC: u32 = 0x484E_5357;

/// Current topology layout version.
pub const FORMAT_VERSION: u32 = 1;

/// Entry point value of a topology with no nodes.
pub const NO_ENTRY_POINT: u32 = u32::MAX;

/// Metric code for squared Euclidean distance.
pub const METRIC_L2: u8 = 0;

/// Metric code for inner product similarity.
pub const METRIC_INNER_PRODUCT: u8 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("missing blob `{0}`")]
    MissingBlob(String),
    #[error("blob `{blob}` size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        blob: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error("invalid topology archive: {0}")]
    InvalidArchive(String),
    #[error("bad topology magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("unsupported topology version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown metric code {0}")]
    UnknownMetric(u8),
    #[error("node {node} layer {layer} references node {neighbor}, but count is {count}")]
    NodeOutOfRange {
        node: u64,
        layer: u32,
        neighbor: u32,
        count: u64,
    },
    #[error("corrupt topology: {0}")]
    CorruptTopology(String),
}
