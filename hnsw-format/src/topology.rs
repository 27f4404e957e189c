use crate::{
    FormatError, FORMAT_VERSION, METRIC_INNER_PRODUCT, METRIC_L2, NO_ENTRY_POINT, TOPOLOGY_MAGIC,
};
use bytecheck::CheckBytes;
use rkyv::{AlignedVec, Archive, Deserialize, Serialize};

/// Scratch space used by the rkyv serializer before spilling to the heap.
const SCRATCH_SPACE: usize = 4096;

/// Fixed header of the `TOPOLOGY` blob.
///
/// `count` and `dim` describe the `RAW_VECTORS` blob that must accompany the
/// topology on load: its size is checked against `dim * count * 4`.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive_attr(derive(CheckBytes, Debug))]
pub struct TopologyHeader {
    pub magic: u32,
    pub version: u32,
    pub metric: u8,
    pub dim: u32,
    pub m: u32,
    pub ef_construction: u32,
    pub max_level: u32,
    pub entry_point: u32,
    pub count: u64,
}

impl TopologyHeader {
    /// Header of an empty topology; the caller fills in count and entry point.
    pub fn new(metric: u8, dim: u32, m: u32, ef_construction: u32) -> Self {
        Self {
            magic: TOPOLOGY_MAGIC,
            version: FORMAT_VERSION,
            metric,
            dim,
            m,
            ef_construction,
            max_level: 0,
            entry_point: NO_ENTRY_POINT,
            count: 0,
        }
    }
}

/// Level and per-layer neighbor ids of one node. `layers.len() == level + 1`.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[archive_attr(derive(CheckBytes, Debug))]
pub struct NodeLinks {
    pub level: u32,
    pub layers: Vec<Vec<u32>>,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[archive_attr(derive(CheckBytes, Debug))]
pub struct TopologyArchive {
    pub header: TopologyHeader,
    pub nodes: Vec<NodeLinks>,
}

/// Maximum neighbor-list length at `layer` for degree bound `m`.
pub fn layer_capacity(m: usize, layer: usize) -> usize {
    if layer == 0 {
        m * 2
    } else {
        m
    }
}

pub fn encode_topology(topology: &TopologyArchive) -> Result<Vec<u8>, FormatError> {
    rkyv::to_bytes::<_, SCRATCH_SPACE>(topology)
        .map(|bytes| bytes.as_slice().to_vec())
        .map_err(|e| FormatError::InvalidArchive(format!("{e:?}")))
}

/// Validates and decodes a `TOPOLOGY` blob.
///
/// Beyond archive validation this checks the invariants a graph needs to be
/// traversed safely: every neighbor id is `< count`, list lengths respect
/// the layer capacity, a node at layer `l` only links nodes that reach `l`,
/// and the entry point sits at `max_level`.
pub fn decode_topology(bytes: &[u8]) -> Result<TopologyArchive, FormatError> {
    // The blob may come from any allocation; rkyv wants its root aligned.
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    let archived = rkyv::check_archived_root::<TopologyArchive>(aligned.as_slice())
        .map_err(|e| FormatError::InvalidArchive(e.to_string()))?;

    let h = &archived.header;
    if h.magic != TOPOLOGY_MAGIC {
        return Err(FormatError::BadMagic(h.magic));
    }
    if h.version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(h.version));
    }
    if h.metric != METRIC_L2 && h.metric != METRIC_INNER_PRODUCT {
        return Err(FormatError::UnknownMetric(h.metric));
    }

    let header = TopologyHeader {
        magic: h.magic,
        version: h.version,
        metric: h.metric,
        dim: h.dim,
        m: h.m,
        ef_construction: h.ef_construction,
        max_level: h.max_level,
        entry_point: h.entry_point,
        count: h.count,
    };
    let count = header.count;

    if archived.nodes.len() as u64 != count {
        return Err(FormatError::CorruptTopology(format!(
            "header declares {} nodes, archive holds {}",
            count,
            archived.nodes.len()
        )));
    }
    if count > 0 && (header.m == 0 || header.dim == 0) {
        return Err(FormatError::CorruptTopology(format!(
            "non-empty topology with m = {} and dim = {}",
            header.m, header.dim
        )));
    }

    let mut nodes = Vec::with_capacity(archived.nodes.len());
    for (node, links) in archived.nodes.iter().enumerate() {
        let level = links.level;
        if level > header.max_level {
            return Err(FormatError::CorruptTopology(format!(
                "node {} has level {} above max level {}",
                node, level, header.max_level
            )));
        }
        if links.layers.len() as u64 != u64::from(level) + 1 {
            return Err(FormatError::CorruptTopology(format!(
                "node {} has level {} but {} layer lists",
                node,
                level,
                links.layers.len()
            )));
        }

        let mut layers = Vec::with_capacity(links.layers.len());
        for (layer, list) in links.layers.iter().enumerate() {
            let cap = layer_capacity(header.m as usize, layer);
            if list.len() > cap {
                return Err(FormatError::CorruptTopology(format!(
                    "node {} layer {} holds {} neighbors, capacity is {}",
                    node,
                    layer,
                    list.len(),
                    cap
                )));
            }
            for &neighbor in list.iter() {
                if u64::from(neighbor) >= count {
                    return Err(FormatError::NodeOutOfRange {
                        node: node as u64,
                        layer: layer as u32,
                        neighbor,
                        count,
                    });
                }
            }
            layers.push(list.to_vec());
        }
        nodes.push(NodeLinks { level, layers });
    }

    for (node, links) in nodes.iter().enumerate() {
        for (layer, list) in links.layers.iter().enumerate() {
            if let Some(&low) = list
                .iter()
                .find(|&&n| (nodes[n as usize].level as usize) < layer)
            {
                return Err(FormatError::CorruptTopology(format!(
                    "node {} links node {} at layer {} above its level",
                    node, low, layer
                )));
            }
        }
    }

    if count == 0 {
        if header.entry_point != NO_ENTRY_POINT {
            return Err(FormatError::CorruptTopology(format!(
                "empty topology with entry point {}",
                header.entry_point
            )));
        }
    } else {
        let entry = header.entry_point;
        if u64::from(entry) >= count {
            return Err(FormatError::CorruptTopology(format!(
                "entry point {} out of range for {} nodes",
                entry, count
            )));
        }
        if nodes[entry as usize].level != header.max_level {
            return Err(FormatError::CorruptTopology(format!(
                "entry point {} has level {}, max level is {}",
                entry, nodes[entry as usize].level, header.max_level
            )));
        }
    }

    Ok(TopologyArchive { header, nodes })
}
