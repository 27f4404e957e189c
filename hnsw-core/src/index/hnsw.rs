use crate::config::{IndexConfig, DEFAULT_SEED};
use crate::dataset::{Dataset, QueryResult, Rows};
use crate::error::{IndexError, Result};
use crate::index::builder::{insert_rows, BuildParams};
use crate::index::distance::{MetricFunction, MetricType};
use crate::index::filter::ExclusionFilter;
use crate::index::graph::{Graph, LevelSampler};
use crate::index::search::SearchEngine;
use crate::index::serializer::{from_binary_set, to_binary_set};
use crate::index::store::VectorStore;
use crate::index::visited::VisitedPool;
use crate::index::VectorIndex;
use hnsw_format::BinarySet;
use log::{debug, info};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Lifecycle state reported by [`HnswIndex::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Empty,
    Ready,
}

/// A built or loaded index: vectors, graph and the parameters they were
/// built with.
struct ReadyIndex {
    dim: usize,
    metric: MetricFunction,
    ef_construction: usize,
    store: VectorStore,
    graph: Graph,
    sampler: LevelSampler,
    visited: VisitedPool,
}

impl ReadyIndex {
    /// Builds a fresh index over `rows`. Assumes `config` passed
    /// `validate_build`.
    fn build(config: &IndexConfig, rows: &Rows<'_>) -> Result<Self> {
        let m = config.m as usize;
        let mut index = Self {
            dim: rows.dim,
            metric: MetricFunction::new(config.metric_type),
            ef_construction: config.ef_construction as usize,
            store: VectorStore::new(rows.dim),
            graph: Graph::new(m),
            sampler: LevelSampler::new(m, config.seed),
            visited: VisitedPool::new(),
        };
        index.insert(rows, config.resolved_build_threads())?;
        Ok(index)
    }

    fn insert(&mut self, rows: &Rows<'_>, threads: usize) -> Result<usize> {
        let params = BuildParams {
            metric: self.metric,
            ef_construction: self.ef_construction,
            threads,
        };
        let ids = insert_rows(
            &mut self.graph,
            &mut self.store,
            rows,
            &mut self.sampler,
            &self.visited,
            params,
        )?;
        Ok(ids.len())
    }

    fn check_dim(&self, context: &'static str, dim: i64) -> Result<()> {
        if dim != self.dim as i64 {
            return Err(IndexError::DimensionMismatch {
                context,
                expected: self.dim as i64,
                actual: dim,
            });
        }
        Ok(())
    }

    fn check_metric(&self, metric: MetricType) -> Result<()> {
        if metric != self.metric.metric() {
            return Err(IndexError::invalid(
                "metric_type",
                format!("{} (index uses {})", metric, self.metric.metric()),
            ));
        }
        Ok(())
    }

    fn search_rows(
        &self,
        queries: &Rows<'_>,
        k: usize,
        ef: usize,
        threads: usize,
        filter: Option<&dyn ExclusionFilter>,
    ) -> QueryResult {
        let nq = queries.len();
        let mut result = QueryResult::padded(nq, k, self.metric.sentinel_distance());
        let engine = SearchEngine::new(&self.graph, &self.store, self.metric, &self.visited);
        let metric = self.metric;

        let fill = |first_row: usize, ids: &mut [i64], distances: &mut [f32]| {
            let rows = ids.chunks_mut(k).zip(distances.chunks_mut(k));
            for (offset, (ids, distances)) in rows.enumerate() {
                let hits = engine.search(queries.row(first_row + offset), k, ef, filter);
                for (slot, hit) in hits.iter().enumerate() {
                    ids[slot] = i64::from(hit.id);
                    distances[slot] = metric.to_distance(hit.score);
                }
            }
        };

        let (ids, distances) = result.slots_mut();
        let threads = threads.min(nq).max(1);
        if threads == 1 {
            fill(0, ids, distances);
            return result;
        }

        let per_thread = nq.div_ceil(threads);
        let blocks = ids
            .chunks_mut(per_thread * k)
            .zip(distances.chunks_mut(per_thread * k));
        let scoped = crossbeam_utils::thread::scope(|s| {
            for (block, (ids, distances)) in blocks.enumerate() {
                let fill = &fill;
                s.spawn(move |_| fill(block * per_thread, ids, distances));
            }
        });
        if let Err(panic) = scoped {
            std::panic::resume_unwind(panic);
        }
        result
    }
}

enum IndexState {
    Empty,
    Ready(ReadyIndex),
}

impl IndexState {
    fn ready(&self, operation: &'static str) -> Result<&ReadyIndex> {
        match self {
            IndexState::Ready(index) => Ok(index),
            IndexState::Empty => Err(IndexError::NotReady { operation }),
        }
    }
}

/// HNSW approximate nearest-neighbor index.
///
/// Starts `Empty`; `train` or `load` make it `Ready`. All state lives
/// behind one read-write lock: `train`, `add_without_ids` and `load` are
/// exclusive, while queries and the other readers run concurrently. A
/// failed operation leaves the previous state in place.
pub struct HnswIndex {
    state: RwLock<IndexState>,
}

impl Default for HnswIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl HnswIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexState::Empty),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> IndexStatus {
        match *self.read() {
            IndexState::Empty => IndexStatus::Empty,
            IndexState::Ready(_) => IndexStatus::Ready,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == IndexStatus::Ready
    }

    /// Number of nodes on each layer, layer 0 first.
    pub fn layer_sizes(&self) -> Result<Vec<usize>> {
        Ok(self.read().ready("layer_sizes")?.graph.layer_sizes())
    }

    /// Like [`VectorIndex::serialize`], but also emits the `RAW_VECTORS`
    /// blob so the result can be loaded on its own.
    pub fn serialize_with_raw_vectors(&self, config: &IndexConfig) -> Result<BinarySet> {
        self.serialize_blobs(config, true)
    }

    fn serialize_blobs(&self, config: &IndexConfig, with_vectors: bool) -> Result<BinarySet> {
        let state = self.read();
        let index = state.ready("serialize")?;
        index.check_dim("serialize", config.dim)?;

        let started = Instant::now();
        let blobs = to_binary_set(
            &index.graph,
            with_vectors.then_some(&index.store),
            index.dim,
            index.metric.metric(),
            index.ef_construction,
        )?;
        debug!(
            "Serialized {} nodes into {} blobs ({} bytes) in {:?}",
            index.graph.len(),
            blobs.len(),
            blobs.total_size(),
            started.elapsed()
        );
        Ok(blobs)
    }

    fn train_locked(
        state: &mut IndexState,
        dataset: &Dataset<'_>,
        config: &IndexConfig,
    ) -> Result<()> {
        config.validate_build()?;
        let rows = dataset.checked("train", config.dim)?;

        let started = Instant::now();
        let index = ReadyIndex::build(config, &rows)?;
        info!(
            "Trained HNSW index: {} rows, dim {}, M {}, efConstruction {}, {} layers in {:?}",
            index.store.len(),
            index.dim,
            index.graph.m(),
            index.ef_construction,
            index.graph.max_level() + 1,
            started.elapsed()
        );
        *state = IndexState::Ready(index);
        Ok(())
    }

    fn extend_locked(
        index: &mut ReadyIndex,
        dataset: &Dataset<'_>,
        config: &IndexConfig,
    ) -> Result<()> {
        config.validate_search()?;
        index.check_dim("add", config.dim)?;
        index.check_metric(config.metric_type)?;
        let rows = dataset.checked("add", config.dim)?;

        let started = Instant::now();
        let before = index.store.len();
        let added = index.insert(&rows, config.resolved_build_threads())?;
        info!(
            "Added {} rows to HNSW index ({} -> {}) in {:?}",
            added,
            before,
            index.store.len(),
            started.elapsed()
        );
        Ok(())
    }
}

impl VectorIndex for HnswIndex {
    fn train(&self, dataset: &Dataset<'_>, config: &IndexConfig) -> Result<()> {
        let mut state = self.write();
        Self::train_locked(&mut state, dataset, config)
    }

    fn add_without_ids(&self, dataset: &Dataset<'_>, config: &IndexConfig) -> Result<()> {
        match &mut *self.write() {
            IndexState::Ready(index) if !index.store.is_empty() => {
                Self::extend_locked(index, dataset, config)
            }
            // Nothing to extend: the first add builds the index.
            state => Self::train_locked(state, dataset, config),
        }
    }

    fn query(
        &self,
        dataset: &Dataset<'_>,
        config: &IndexConfig,
        filter: Option<&dyn ExclusionFilter>,
    ) -> Result<QueryResult> {
        let state = self.read();
        let index = state.ready("query")?;
        config.validate_search()?;
        index.check_dim("query", config.dim)?;
        index.check_metric(config.metric_type)?;
        let queries = dataset.checked("query", config.dim)?;

        let k = config.k as usize;
        let ef = config.effective_ef();
        let threads = config.resolved_query_threads();
        Ok(index.search_rows(&queries, k, ef, threads, filter))
    }

    fn serialize(&self, config: &IndexConfig) -> Result<BinarySet> {
        self.serialize_blobs(config, false)
    }

    fn load(&self, blobs: &BinarySet) -> Result<()> {
        let started = Instant::now();
        let loaded = from_binary_set(blobs)?;
        let count = loaded.store.len();
        let m = loaded.graph.m();
        let index = ReadyIndex {
            dim: loaded.store.dim(),
            metric: MetricFunction::new(loaded.metric),
            ef_construction: loaded.ef_construction,
            sampler: LevelSampler::new(m, DEFAULT_SEED.wrapping_add(count as u64)),
            visited: VisitedPool::new(),
            store: loaded.store,
            graph: loaded.graph,
        };
        info!(
            "Loaded HNSW index: {} rows, dim {}, metric {}, M {} in {:?}",
            count,
            index.dim,
            index.metric.metric(),
            m,
            started.elapsed()
        );
        *self.write() = IndexState::Ready(index);
        Ok(())
    }

    fn count(&self) -> Result<i64> {
        Ok(self.read().ready("count")?.store.len() as i64)
    }

    fn dim(&self) -> Result<i64> {
        Ok(self.read().ready("dim")?.dim as i64)
    }
}
