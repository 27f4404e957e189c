use crate::index::distance::MetricFunction;
use crate::index::filter::ExclusionFilter;
use crate::index::graph::Graph;
use crate::index::store::VectorStore;
use crate::index::visited::{VisitedList, VisitedPool};
use log::debug;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A node and its score against the current query (lower is closer).
///
/// Ordering is total: by score, then by id, so ties always resolve to the
/// lower id and searches are deterministic.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub score: f32,
    pub id: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.id.cmp(&other.id))
    }
}

// Wrapper for Min-Heap (BinaryHeap pops largest, so Reverse comparisons)
#[derive(PartialEq, Eq)]
struct MinCandidate(Candidate);

impl PartialOrd for MinCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

/// Single-layer traversal primitives shared by insertion and querying.
#[derive(Clone, Copy)]
pub(crate) struct LayerSearch<'a> {
    pub graph: &'a Graph,
    pub store: &'a VectorStore,
    pub metric: MetricFunction,
}

impl<'a> LayerSearch<'a> {
    pub fn new(graph: &'a Graph, store: &'a VectorStore, metric: MetricFunction) -> Self {
        Self {
            graph,
            store,
            metric,
        }
    }

    #[inline(always)]
    pub fn candidate(&self, query: &[f32], id: u32) -> Candidate {
        Candidate {
            score: self.metric.score(query, self.store.row(id as usize)),
            id,
        }
    }

    /// Greedy descent on one layer: move to the closest neighbor until no
    /// neighbor improves on the current node.
    pub fn greedy_closest(
        &self,
        query: &[f32],
        start: Candidate,
        layer: usize,
        scratch: &mut Vec<u32>,
    ) -> Candidate {
        let mut best = start;
        loop {
            self.graph.node(best.id).copy_neighbors(layer, scratch);
            let mut improved = false;
            for &nid in scratch.iter() {
                let c = self.candidate(query, nid);
                if c < best {
                    best = c;
                    improved = true;
                }
            }
            if !improved {
                return best;
            }
        }
    }

    /// Bounded best-first search on one layer.
    ///
    /// Returns up to `ef` closest non-excluded nodes, closest first. Excluded
    /// nodes are expanded like any other but never occupy a result slot, so
    /// a heavy filter widens the traversal rather than shrinking the result.
    #[allow(clippy::too_many_arguments)]
    pub fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[Candidate],
        ef: usize,
        layer: usize,
        visited: &mut VisitedList,
        filter: Option<&dyn ExclusionFilter>,
        scratch: &mut Vec<u32>,
    ) -> Vec<Candidate> {
        let excluded = |id: u32| filter.map_or(false, |f| f.is_excluded(id as usize));
        let mut candidates = BinaryHeap::with_capacity(ef * 2);
        let mut results: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef + 1);

        visited.clear();
        for &ep in entry_points {
            if !visited.insert(ep.id) {
                continue;
            }
            candidates.push(MinCandidate(ep));
            if !excluded(ep.id) {
                results.push(ep);
                if results.len() > ef {
                    results.pop();
                }
            }
        }

        while let Some(MinCandidate(top)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if top > *worst {
                        break;
                    }
                }
            }

            self.graph.node(top.id).copy_neighbors(layer, scratch);
            for &nid in scratch.iter() {
                if !visited.insert(nid) {
                    continue;
                }
                let c = self.candidate(query, nid);
                let improves = results.len() < ef || results.peek().map_or(true, |w| c < *w);
                if improves {
                    candidates.push(MinCandidate(c));
                    if !excluded(nid) {
                        results.push(c);
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        results.into_sorted_vec()
    }
}

/// Answers top-k queries against a built graph.
///
/// Read-only over the graph and store; any number of engines may search
/// the same index concurrently, each taking its own visited list from the
/// shared pool.
pub struct SearchEngine<'a> {
    layers: LayerSearch<'a>,
    visited: &'a VisitedPool,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        graph: &'a Graph,
        store: &'a VectorStore,
        metric: MetricFunction,
        visited: &'a VisitedPool,
    ) -> Self {
        Self {
            layers: LayerSearch::new(graph, store, metric),
            visited,
        }
    }

    /// Up to `k` closest non-excluded nodes to `query`, closest first.
    ///
    /// Fewer than `k` are returned only when fewer than `k` non-excluded
    /// nodes exist.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        filter: Option<&dyn ExclusionFilter>,
    ) -> Vec<Candidate> {
        let graph = self.layers.graph;
        let Some((entry, top)) = graph.entry_point() else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let mut scratch = Vec::new();
        let mut current = self.layers.candidate(query, entry);
        for layer in (1..=top).rev() {
            current = self.layers.greedy_closest(query, current, layer, &mut scratch);
        }

        let mut visited = self.visited.acquire(graph.len());
        let mut found = self.layers.search_layer(
            query,
            &[current],
            ef.max(k),
            0,
            &mut visited,
            filter,
            &mut scratch,
        );
        found.truncate(k);

        if found.len() < k {
            self.top_up(query, k, filter, &visited, &mut found);
        }
        found
    }

    /// Scores every unvisited, non-excluded node when the beam came back
    /// short, which only happens on tiny or heavily filtered graphs.
    fn top_up(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&dyn ExclusionFilter>,
        visited: &VisitedList,
        found: &mut Vec<Candidate>,
    ) {
        let count = self.layers.graph.len();
        let excluded = filter.map_or(0, |f| f.excluded_count(count));
        let wanted = k.min(count.saturating_sub(excluded));
        if found.len() >= wanted {
            return;
        }

        debug!(
            "Beam returned {}/{} results over {} nodes; scanning unvisited nodes",
            found.len(),
            wanted,
            count
        );
        for id in 0..count as u32 {
            if visited.contains(id) || filter.map_or(false, |f| f.is_excluded(id as usize)) {
                continue;
            }
            found.push(self.layers.candidate(query, id));
        }
        found.sort_unstable();
        found.truncate(k);
    }
}
