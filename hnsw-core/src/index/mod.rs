pub mod builder;
pub mod distance;
pub mod filter;
pub mod graph;
pub mod hnsw;
pub mod search;
pub mod serializer;
pub mod simd;
pub mod store;
pub mod visited;

use crate::config::IndexConfig;
use crate::dataset::{Dataset, QueryResult};
use crate::error::Result;
use filter::ExclusionFilter;
use hnsw_format::BinarySet;

/// Lifecycle operations of an ANN index, as driven by an external harness.
///
/// `train` and `load` replace the whole index; `add_without_ids` appends
/// rows, which receive consecutive ids after the existing ones. Every other
/// operation fails with `NotReady` until one of those has succeeded.
pub trait VectorIndex {
    fn train(&self, dataset: &Dataset<'_>, config: &IndexConfig) -> Result<()>;
    fn add_without_ids(&self, dataset: &Dataset<'_>, config: &IndexConfig) -> Result<()>;
    fn query(
        &self,
        dataset: &Dataset<'_>,
        config: &IndexConfig,
        filter: Option<&dyn ExclusionFilter>,
    ) -> Result<QueryResult>;
    /// Persists the graph. Raw vectors are not included.
    fn serialize(&self, config: &IndexConfig) -> Result<BinarySet>;
    fn load(&self, blobs: &BinarySet) -> Result<()>;
    fn count(&self) -> Result<i64>;
    fn dim(&self) -> Result<i64>;
}
