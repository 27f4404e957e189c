use crate::index::simd::{self, KernelFn};
use hnsw_format::{METRIC_INNER_PRODUCT, METRIC_L2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Similarity measure of an index. Determines result ordering direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MetricType {
    /// Squared Euclidean distance; smaller is closer.
    #[default]
    L2,
    /// Inner product; larger is closer.
    InnerProduct,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::L2 => "L2",
            MetricType::InnerProduct => "IP",
        }
    }

    /// Code stored in the topology header.
    pub fn code(&self) -> u8 {
        match self {
            MetricType::L2 => METRIC_L2,
            MetricType::InnerProduct => METRIC_INNER_PRODUCT,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            METRIC_L2 => Some(MetricType::L2),
            METRIC_INNER_PRODUCT => Some(MetricType::InnerProduct),
            _ => None,
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L2" => Ok(MetricType::L2),
            "IP" | "INNERPRODUCT" | "INNER_PRODUCT" => Ok(MetricType::InnerProduct),
            _ => Err(format!("unknown metric type `{}` (expected L2 or IP)", s)),
        }
    }
}

impl TryFrom<String> for MetricType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MetricType> for String {
    fn from(metric: MetricType) -> Self {
        metric.as_str().to_string()
    }
}

/// Distance computation for one metric, with the SIMD kernel resolved once.
///
/// Internally every metric is a *score* where lower is closer: the squared
/// L2 distance, or the negated inner product. Scores are converted back to
/// the caller-facing distance only when results are materialized.
#[derive(Clone, Copy)]
pub struct MetricFunction {
    metric: MetricType,
    kernel: KernelFn,
}

impl MetricFunction {
    pub fn new(metric: MetricType) -> Self {
        let kernel = match metric {
            MetricType::L2 => simd::l2_kernel(),
            MetricType::InnerProduct => simd::dot_kernel(),
        };
        Self { metric, kernel }
    }

    pub fn metric(&self) -> MetricType {
        self.metric
    }

    #[inline(always)]
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        let raw = (self.kernel)(a, b);
        match self.metric {
            MetricType::L2 => raw,
            MetricType::InnerProduct => -raw,
        }
    }

    /// Caller-facing distance (L2) or similarity (IP) of a score.
    #[inline]
    pub fn to_distance(&self, score: f32) -> f32 {
        match self.metric {
            MetricType::L2 => score,
            MetricType::InnerProduct => -score,
        }
    }

    /// Distance reported in unfilled result slots. Sorts after every real hit.
    pub fn sentinel_distance(&self) -> f32 {
        match self.metric {
            MetricType::L2 => f32::INFINITY,
            MetricType::InnerProduct => f32::NEG_INFINITY,
        }
    }
}

impl fmt::Debug for MetricFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricFunction")
            .field("metric", &self.metric)
            .finish()
    }
}
