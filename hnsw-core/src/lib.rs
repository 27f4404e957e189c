//! HNSW approximate nearest-neighbor index.
//!
//! [`HnswIndex`] is the entry point; it implements [`VectorIndex`], the
//! train / add / query / serialize / load lifecycle an external harness
//! drives. Persisted state is a [`BinarySet`] whose layout is defined in the
//! `hnsw-format` crate.

pub mod config;
pub mod dataset;
pub mod error;
pub mod index;

pub use config::IndexConfig;
pub use dataset::{Dataset, QueryResult, SENTINEL_ID};
pub use error::{ErrorKind, IndexError, Result};
pub use index::distance::MetricType;
pub use index::filter::{Bitset, ExclusionFilter, IdList};
pub use index::hnsw::{HnswIndex, IndexStatus};
pub use index::VectorIndex;

pub use hnsw_format::{BinarySet, RAW_VECTORS, TOPOLOGY};
