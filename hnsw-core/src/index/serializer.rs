//! Conversion between the in-memory graph and the persisted blob set.

use crate::error::{IndexError, Result};
use crate::index::distance::MetricType;
use crate::index::graph::{Graph, GraphNode};
use crate::index::store::VectorStore;
use hnsw_format::{
    decode_topology, encode_topology, BinarySet, FormatError, NodeLinks, TopologyArchive,
    TopologyHeader, RAW_VECTORS, TOPOLOGY,
};

/// Everything `Load` recovers from a blob set.
#[derive(Debug)]
pub(crate) struct LoadedIndex {
    pub graph: Graph,
    pub store: VectorStore,
    pub metric: MetricType,
    pub ef_construction: usize,
}

fn to_u32(field: &'static str, value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| IndexError::invalid(field, value))
}

/// Encodes the graph (not the vectors) as a `TOPOLOGY` blob.
pub(crate) fn encode_graph(
    graph: &Graph,
    dim: usize,
    metric: MetricType,
    ef_construction: usize,
) -> Result<Vec<u8>> {
    let mut header = TopologyHeader::new(
        metric.code(),
        to_u32("dim", dim)?,
        to_u32("M", graph.m())?,
        to_u32("efConstruction", ef_construction)?,
    );
    header.count = graph.len() as u64;
    if let Some((entry, level)) = graph.entry_point() {
        header.entry_point = entry;
        header.max_level = level as u32;
    }

    let mut nodes = Vec::new();
    nodes
        .try_reserve_exact(graph.len())
        .map_err(IndexError::resource("encoding topology"))?;
    for node in graph.nodes() {
        nodes.push(NodeLinks {
            level: node.level() as u32,
            layers: (0..=node.level()).map(|layer| node.neighbors(layer)).collect(),
        });
    }

    Ok(encode_topology(&TopologyArchive { header, nodes })?)
}

/// Blob set holding `TOPOLOGY` and, when `store` is given, `RAW_VECTORS`.
pub(crate) fn to_binary_set(
    graph: &Graph,
    store: Option<&VectorStore>,
    dim: usize,
    metric: MetricType,
    ef_construction: usize,
) -> Result<BinarySet> {
    let mut blobs = BinarySet::new();
    blobs.append(TOPOLOGY, encode_graph(graph, dim, metric, ef_construction)?);
    if let Some(store) = store {
        blobs.append(RAW_VECTORS, store.to_bytes());
    }
    Ok(blobs)
}

/// Rebuilds graph and store from a blob set. Both blobs are required and
/// must agree with each other; nothing is returned unless every check
/// passes.
pub(crate) fn from_binary_set(blobs: &BinarySet) -> Result<LoadedIndex> {
    let topology = decode_topology(blobs.require(TOPOLOGY)?)?;
    let raw = blobs.require(RAW_VECTORS)?;

    let header = topology.header;
    let metric =
        MetricType::from_code(header.metric).ok_or(FormatError::UnknownMetric(header.metric))?;
    let count = usize::try_from(header.count)
        .map_err(|_| FormatError::CorruptTopology(format!("count {} too large", header.count)))?;
    let dim = header.dim as usize;
    let store = VectorStore::from_bytes(dim, count, raw)?;

    let nodes: Vec<GraphNode> = topology
        .nodes
        .into_iter()
        .map(|links| GraphNode::from_lists(links.level as usize, links.layers))
        .collect();
    let entry = (count > 0).then_some((header.entry_point, header.max_level as usize));
    let graph = Graph::from_parts(header.m as usize, nodes, entry);

    Ok(LoadedIndex {
        graph,
        store,
        metric,
        ef_construction: header.ef_construction as usize,
    })
}
