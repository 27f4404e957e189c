use crate::error::{IndexError, Result};
use crate::index::distance::MetricType;
use serde::{Deserialize, Serialize};

pub const DEFAULT_M: i64 = 16;
pub const DEFAULT_EF_CONSTRUCTION: i64 = 200;
pub const DEFAULT_SEED: u64 = 100;

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_m() -> i64 {
    DEFAULT_M
}

fn default_ef_construction() -> i64 {
    DEFAULT_EF_CONSTRUCTION
}

fn default_threads() -> usize {
    1
}

/// Index and search parameters.
///
/// Serialized with the key names external harnesses use (`"k"`, `"M"`,
/// `"efConstruction"`, `"metric_type"`), so a JSON config can be passed
/// through unchanged. Numeric parameters are signed so that out-of-range
/// values reach validation instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub dim: i64,
    /// Results per query.
    pub k: i64,
    /// Max neighbors per node per layer; layer 0 gets `2 * M`.
    #[serde(rename = "M", default = "default_m")]
    pub m: i64,
    #[serde(rename = "efConstruction", default = "default_ef_construction")]
    pub ef_construction: i64,
    /// Query beam width. Values below `k` are raised to `k`.
    #[serde(default)]
    pub ef: i64,
    #[serde(default)]
    pub metric_type: MetricType,
    /// Seed of the level generator; equal seeds give identical graphs.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Insertion threads. 0 uses every available core.
    #[serde(default = "default_threads")]
    pub build_threads: usize,
    /// Threads for batch queries. 0 uses every available core.
    #[serde(default = "default_threads")]
    pub query_threads: usize,
}

impl IndexConfig {
    pub fn new(dim: i64, k: i64, metric_type: MetricType) -> Self {
        Self {
            dim,
            k,
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef: k,
            metric_type,
            seed: DEFAULT_SEED,
            build_threads: 1,
            query_threads: 1,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| IndexError::invalid("config", e))
    }

    pub fn to_json(&self) -> String {
        // A struct of plain scalars always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn with_m(mut self, m: i64) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_construction(mut self, ef_construction: i64) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn with_ef(mut self, ef: i64) -> Self {
        self.ef = ef;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_build_threads(mut self, threads: usize) -> Self {
        self.build_threads = threads;
        self
    }

    pub fn with_query_threads(mut self, threads: usize) -> Self {
        self.query_threads = threads;
        self
    }

    /// Checks the parameters needed to build or extend a graph.
    pub fn validate_build(&self) -> Result<()> {
        self.validate_search()?;
        if self.m <= 0 {
            return Err(IndexError::invalid("M", self.m));
        }
        if self.m > i64::from(u32::MAX / 2) {
            return Err(IndexError::invalid("M", self.m));
        }
        if self.ef_construction <= 0 || self.ef_construction > i64::from(u32::MAX) {
            return Err(IndexError::invalid("efConstruction", self.ef_construction));
        }
        Ok(())
    }

    /// Checks the parameters needed to answer queries.
    pub fn validate_search(&self) -> Result<()> {
        if self.dim <= 0 || self.dim > i64::from(u32::MAX) {
            return Err(IndexError::invalid("dim", self.dim));
        }
        if self.k <= 0 {
            return Err(IndexError::invalid("k", self.k));
        }
        Ok(())
    }

    /// Query beam width, clamped to at least `k`.
    pub fn effective_ef(&self) -> usize {
        self.ef.max(self.k).max(1) as usize
    }

    pub(crate) fn resolved_build_threads(&self) -> usize {
        resolve_threads(self.build_threads)
    }

    pub(crate) fn resolved_query_threads(&self) -> usize {
        resolve_threads(self.query_threads)
    }
}

fn resolve_threads(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
