use crate::error::{IndexError, Result};
use hnsw_format::layer_capacity;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

/// Highest layer a node may be sampled into.
pub const MAX_LEVEL: usize = 16;

/// Packed entry word of an empty graph.
const NO_ENTRY: u64 = u64::MAX;

#[inline]
fn pack_entry(id: u32, level: usize) -> u64 {
    (u64::from(id) << 32) | level as u64
}

#[inline]
fn unpack_entry(word: u64) -> Option<(u32, usize)> {
    if word == NO_ENTRY {
        None
    } else {
        Some(((word >> 32) as u32, (word & 0xFFFF_FFFF) as usize))
    }
}

/// One node of the layered graph: its level and a neighbor list per layer
/// `0..=level`.
///
/// Each list sits behind its own lock so that concurrent inserts only
/// serialize on the node they are rewriting. Lists are allocated at their
/// full capacity up front; insertion never grows them.
#[derive(Debug)]
pub struct GraphNode {
    level: usize,
    layers: Box<[RwLock<Vec<u32>>]>,
}

impl GraphNode {
    pub(crate) fn new(level: usize, m: usize) -> Result<Self> {
        let mut layers = Vec::new();
        layers
            .try_reserve_exact(level + 1)
            .map_err(IndexError::resource("allocating node layers"))?;
        for layer in 0..=level {
            let mut list = Vec::new();
            list.try_reserve_exact(layer_capacity(m, layer))
                .map_err(IndexError::resource("allocating neighbor lists"))?;
            layers.push(RwLock::new(list));
        }
        Ok(Self {
            level,
            layers: layers.into_boxed_slice(),
        })
    }

    pub(crate) fn from_lists(level: usize, lists: Vec<Vec<u32>>) -> Self {
        Self {
            level,
            layers: lists.into_iter().map(RwLock::new).collect(),
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Copy of the neighbor list at `layer`; empty above the node's level.
    pub fn neighbors(&self, layer: usize) -> Vec<u32> {
        let mut out = Vec::new();
        self.copy_neighbors(layer, &mut out);
        out
    }

    /// Replaces `out` with the neighbor list at `layer` under a short read lock.
    #[inline]
    pub(crate) fn copy_neighbors(&self, layer: usize, out: &mut Vec<u32>) {
        out.clear();
        if let Some(lock) = self.layers.get(layer) {
            out.extend_from_slice(&lock.read().unwrap_or_else(PoisonError::into_inner));
        }
    }

    /// Exclusive access to the list at `layer`. `layer` must be `<= level`.
    pub(crate) fn write(&self, layer: usize) -> RwLockWriteGuard<'_, Vec<u32>> {
        self.layers[layer]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// The multi-layer adjacency structure.
///
/// Node identity is the row index into the vector store. The entry point
/// and the maximum level are packed into a single atomic word, so a reader
/// never observes one without the other.
#[derive(Debug)]
pub struct Graph {
    m: usize,
    nodes: Vec<GraphNode>,
    entry: AtomicU64,
}

impl Graph {
    pub fn new(m: usize) -> Self {
        Self {
            m,
            nodes: Vec::new(),
            entry: AtomicU64::new(NO_ENTRY),
        }
    }

    /// Graph from already validated parts (used by the loader).
    pub(crate) fn from_parts(m: usize, nodes: Vec<GraphNode>, entry: Option<(u32, usize)>) -> Self {
        let word = entry.map_or(NO_ENTRY, |(id, level)| pack_entry(id, level));
        Self {
            m,
            nodes,
            entry: AtomicU64::new(word),
        }
    }

    pub fn m(&self) -> usize {
        self.m
    }

    /// Degree bound at `layer`: `2 * M` at layer 0, `M` above.
    #[inline]
    pub fn capacity(&self, layer: usize) -> usize {
        layer_capacity(self.m, layer)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline(always)]
    pub fn node(&self, id: u32) -> &GraphNode {
        &self.nodes[id as usize]
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Current `(entry point, max level)`, or `None` before the first insert.
    #[inline]
    pub fn entry_point(&self) -> Option<(u32, usize)> {
        unpack_entry(self.entry.load(Ordering::Acquire))
    }

    pub fn max_level(&self) -> usize {
        self.entry_point().map_or(0, |(_, level)| level)
    }

    /// Makes `id` the entry point if the graph has none or `level` exceeds
    /// the current max level. Returns whether the swap happened.
    pub(crate) fn promote_entry(&self, id: u32, level: usize) -> bool {
        let mut current = self.entry.load(Ordering::Acquire);
        loop {
            if let Some((_, top)) = unpack_entry(current) {
                if level <= top {
                    return false;
                }
            }
            match self.entry.compare_exchange_weak(
                current,
                pack_entry(id, level),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn reserve(&mut self, additional: usize) -> Result<()> {
        let total = self.nodes.len().saturating_add(additional);
        if total >= u32::MAX as usize {
            return Err(IndexError::invalid("rows", total));
        }
        self.nodes
            .try_reserve(additional)
            .map_err(IndexError::resource("reserving graph nodes"))
    }

    /// Appends an unlinked node. Its edges are created by the builder.
    pub(crate) fn push_node(&mut self, level: usize) -> Result<u32> {
        let id = self.nodes.len() as u32;
        self.nodes.push(GraphNode::new(level, self.m)?);
        Ok(id)
    }

    /// Drops unlinked nodes from `len` on. Used to undo a failed append
    /// before any of the dropped nodes were inserted.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    /// Node count per layer, layer 0 first.
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.max_level() + 1];
        for node in &self.nodes {
            for size in sizes.iter_mut().take(node.level + 1) {
                *size += 1;
            }
        }
        sizes
    }

    /// True if every edge has its reverse edge on the same layer.
    pub fn is_symmetric(&self) -> bool {
        self.nodes.iter().enumerate().all(|(id, node)| {
            (0..=node.level).all(|layer| {
                node.neighbors(layer)
                    .iter()
                    .all(|&n| self.node(n).neighbors(layer).contains(&(id as u32)))
            })
        })
    }

    /// Removes every edge whose reverse edge is missing and returns how
    /// many were removed.
    pub(crate) fn drop_one_sided_edges(&self) -> usize {
        let mut removed = 0;
        for (id, node) in self.nodes.iter().enumerate() {
            for layer in 0..=node.level {
                let list = node.neighbors(layer);
                let kept: Vec<u32> = list
                    .iter()
                    .copied()
                    .filter(|&n| self.node(n).neighbors(layer).contains(&(id as u32)))
                    .collect();
                if kept.len() != list.len() {
                    removed += list.len() - kept.len();
                    *node.write(layer) = kept;
                }
            }
        }
        removed
    }

    /// Checks structural invariants against a store of `count` rows: node
    /// count, id range, degree bounds, no self or duplicate edges, edges only
    /// between nodes present on the layer, entry point at the max level.
    pub fn check_invariants(&self, count: usize) -> std::result::Result<(), String> {
        if self.nodes.len() != count {
            return Err(format!("{} nodes for {} rows", self.nodes.len(), count));
        }
        for (id, node) in self.nodes.iter().enumerate() {
            for layer in 0..=node.level {
                let list = node.neighbors(layer);
                if list.len() > self.capacity(layer) {
                    return Err(format!("node {} layer {} over capacity", id, layer));
                }
                for (i, &n) in list.iter().enumerate() {
                    if n as usize >= count {
                        return Err(format!("node {} links out-of-range node {}", id, n));
                    }
                    if n as usize == id {
                        return Err(format!("node {} links itself", id));
                    }
                    if list[..i].contains(&n) {
                        return Err(format!("node {} links {} twice", id, n));
                    }
                    if self.node(n).level < layer {
                        return Err(format!("node {} links {} above its level", id, n));
                    }
                }
            }
        }
        match self.entry_point() {
            None if count > 0 => Err("no entry point".to_string()),
            Some((id, level)) => {
                let top = self.nodes.iter().map(|n| n.level).max().unwrap_or(0);
                if id as usize >= count || self.node(id).level != level || level != top {
                    Err(format!("entry point {} at level {} is not at max level {}", id, level, top))
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }
}

/// Seeded source of node levels.
///
/// Levels follow the geometric distribution `floor(-ln(U) * mL)` with
/// `mL = 1 / ln(M)`. The generator is explicit so that a given seed always
/// reproduces the same level sequence.
#[derive(Debug, Clone)]
pub struct LevelSampler {
    rng: StdRng,
    ml: f64,
}

impl LevelSampler {
    pub fn new(m: usize, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ml: 1.0 / (m.max(2) as f64).ln(),
        }
    }

    pub fn sample(&mut self) -> usize {
        // gen() is in [0, 1); flip it so ln() never sees zero.
        let u: f64 = 1.0 - self.rng.gen::<f64>();
        let level = (-u.ln() * self.ml).floor();
        (level as usize).min(MAX_LEVEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_point_only_moves_up() {
        let graph = Graph::new(4);
        assert_eq!(graph.entry_point(), None);

        assert!(graph.promote_entry(3, 1));
        assert!(!graph.promote_entry(5, 1));
        assert!(!graph.promote_entry(6, 0));
        assert_eq!(graph.entry_point(), Some((3, 1)));

        assert!(graph.promote_entry(9, 4));
        assert_eq!(graph.entry_point(), Some((9, 4)));
        assert_eq!(graph.max_level(), 4);
    }

    #[test]
    fn test_nodes_have_a_list_per_layer() {
        let mut graph = Graph::new(3);
        graph.reserve(2).unwrap();
        let a = graph.push_node(0).unwrap();
        let b = graph.push_node(2).unwrap();

        assert_eq!(graph.node(b).level(), 2);
        assert!(graph.node(a).neighbors(1).is_empty());

        graph.node(a).write(0).push(b);
        graph.node(b).write(0).push(a);
        assert_eq!(graph.node(a).neighbors(0), vec![b]);
        assert!(graph.is_symmetric());

        graph.node(b).write(1).push(a);
        assert!(graph.check_invariants(2).is_err());
        assert_eq!(graph.drop_one_sided_edges(), 0);

        graph.node(a).write(0).clear();
        assert!(!graph.is_symmetric());
        assert_eq!(graph.drop_one_sided_edges(), 1);
        assert!(graph.is_symmetric());
    }

    #[test]
    fn test_level_sampler_is_seeded() {
        let mut a = LevelSampler::new(12, 7);
        let mut b = LevelSampler::new(12, 7);
        let xs: Vec<usize> = (0..1000).map(|_| a.sample()).collect();
        let ys: Vec<usize> = (0..1000).map(|_| b.sample()).collect();
        assert_eq!(xs, ys);

        // P(level >= 1) = 1/M for mL = 1/ln(M); about 83 of 1000 for M = 12.
        let upper = xs.iter().filter(|&&l| l >= 1).count();
        assert!((30..200).contains(&upper), "{} nodes above layer 0", upper);
        assert!(xs.iter().all(|&l| l <= MAX_LEVEL));
    }

    #[test]
    fn test_degenerate_m_still_samples() {
        let mut sampler = LevelSampler::new(1, 1);
        for _ in 0..100 {
            assert!(sampler.sample() <= MAX_LEVEL);
        }
    }
}
