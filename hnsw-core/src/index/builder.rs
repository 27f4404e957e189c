use crate::dataset::Rows;
use crate::error::Result;
use crate::index::distance::MetricFunction;
use crate::index::graph::{Graph, LevelSampler};
use crate::index::search::{Candidate, LayerSearch};
use crate::index::store::VectorStore;
use crate::index::visited::{VisitedList, VisitedPool};
use log::{debug, trace};
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reusable buffers for one inserting thread.
#[derive(Debug, Default)]
pub(crate) struct BuildScratch {
    neighbors: Vec<u32>,
    pool: Vec<Candidate>,
    selected: Vec<Candidate>,
    rejected: Vec<Candidate>,
    dropped: Vec<u32>,
}

/// Links nodes into the graph one at a time.
///
/// Nodes must already be pushed into the graph (with their sampled level)
/// and their vectors into the store. `insert` only takes shared references,
/// so several builders may run over the same graph at once.
pub(crate) struct GraphBuilder<'a> {
    layers: LayerSearch<'a>,
    ef_construction: usize,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        graph: &'a Graph,
        store: &'a VectorStore,
        metric: MetricFunction,
        ef_construction: usize,
    ) -> Self {
        Self {
            layers: LayerSearch::new(graph, store, metric),
            ef_construction: ef_construction.max(1),
        }
    }

    fn graph(&self) -> &'a Graph {
        self.layers.graph
    }

    /// Links node `id` into every layer up to its level and promotes it to
    /// entry point if it is the new highest node.
    pub fn insert(&self, id: u32, visited: &mut VisitedList, scratch: &mut BuildScratch) {
        let graph = self.graph();
        let level = graph.node(id).level();

        let Some((entry, top)) = graph.entry_point() else {
            graph.promote_entry(id, level);
            trace!("Node {} is the first entry point (level {})", id, level);
            return;
        };

        let query = self.layers.store.row(id as usize);
        let mut current = self.layers.candidate(query, entry);
        for layer in (level + 1..=top).rev() {
            current = self
                .layers
                .greedy_closest(query, current, layer, &mut scratch.neighbors);
        }

        let mut entry_points = vec![current];
        for layer in (0..=level.min(top)).rev() {
            let mut found = self.layers.search_layer(
                query,
                &entry_points,
                self.ef_construction,
                layer,
                visited,
                None,
                &mut scratch.neighbors,
            );
            found.retain(|c| c.id != id);

            self.select_neighbors(&found, graph.capacity(layer), scratch);
            let chosen: Vec<u32> = scratch.selected.iter().map(|c| c.id).collect();
            // Concurrent inserts may already have linked `id` here, so its own
            // list goes through the same capped path as everyone else's.
            for &n in &chosen {
                if self.connect(id, n, layer, scratch) {
                    self.connect(n, id, layer, scratch);
                }
            }

            if !found.is_empty() {
                entry_points = found;
            }
        }

        if graph.promote_entry(id, level) {
            trace!("Node {} promoted to entry point at level {}", id, level);
        }
        trace!(
            "Inserted node {} at level {} with {} layer-0 links",
            id,
            level,
            graph.node(id).neighbors(0).len()
        );
    }

    /// Diversity heuristic over `candidates` (sorted closest first, scored
    /// against the base node). A candidate is rejected when it is closer to
    /// an already selected neighbor than to the base. If fewer than `cap`
    /// survive, the closest rejected candidates fill the remaining slots.
    ///
    /// The result is left in `scratch.selected`.
    fn select_neighbors(&self, candidates: &[Candidate], cap: usize, scratch: &mut BuildScratch) {
        let store = self.layers.store;
        let metric = self.layers.metric;
        scratch.selected.clear();
        scratch.rejected.clear();

        for &c in candidates {
            if scratch.selected.len() >= cap {
                break;
            }
            let row = store.row(c.id as usize);
            let diverse = scratch
                .selected
                .iter()
                .all(|s| metric.score(row, store.row(s.id as usize)) >= c.score);
            if diverse {
                scratch.selected.push(c);
            } else {
                scratch.rejected.push(c);
            }
        }

        let missing = cap.saturating_sub(scratch.selected.len());
        scratch
            .selected
            .extend(scratch.rejected.iter().take(missing).copied());
    }

    /// Adds `to` to `from`'s list at `layer`. When the list is full it is
    /// shrunk with the selection heuristic over its members plus `to`, and
    /// every node that falls out loses its reverse edge as well.
    ///
    /// Returns whether `to` is in the list afterwards.
    fn connect(&self, from: u32, to: u32, layer: usize, scratch: &mut BuildScratch) -> bool {
        let graph = self.graph();
        let store = self.layers.store;
        let metric = self.layers.metric;
        let cap = graph.capacity(layer);
        scratch.dropped.clear();

        {
            let mut list = graph.node(from).write(layer);
            if list.contains(&to) {
                return true;
            }
            if list.len() < cap {
                list.push(to);
                return true;
            }

            let base = store.row(from as usize);
            scratch.pool.clear();
            scratch.pool.extend(list.iter().chain(std::iter::once(&to)).map(|&n| Candidate {
                score: metric.score(base, store.row(n as usize)),
                id: n,
            }));
            scratch.pool.sort_unstable();

            let pool = std::mem::take(&mut scratch.pool);
            self.select_neighbors(&pool, cap, scratch);
            scratch.pool = pool;

            for c in &scratch.pool {
                if !scratch.selected.iter().any(|s| s.id == c.id) {
                    scratch.dropped.push(c.id);
                }
            }
            list.clear();
            list.extend(scratch.selected.iter().map(|c| c.id));
        }

        for &gone in &scratch.dropped {
            graph.node(gone).write(layer).retain(|&n| n != from);
        }
        !scratch.dropped.contains(&to)
    }
}

/// Parameters of one batch insertion.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuildParams {
    pub metric: MetricFunction,
    pub ef_construction: usize,
    pub threads: usize,
}

/// Appends `rows` to the store and links them into the graph.
///
/// Levels are drawn from `sampler` in row order before anything is
/// inserted. All allocation happens up front: if it fails, the store,
/// graph and sampler are restored to their state on entry. Returns the ids
/// of the new nodes.
pub(crate) fn insert_rows(
    graph: &mut Graph,
    store: &mut VectorStore,
    rows: &Rows<'_>,
    sampler: &mut LevelSampler,
    visited: &VisitedPool,
    params: BuildParams,
) -> Result<Range<usize>> {
    let saved_sampler = sampler.clone();
    let levels: Vec<usize> = (0..rows.len()).map(|_| sampler.sample()).collect();

    let first = store.len();
    let reserved = graph
        .reserve(levels.len())
        .and_then(|_| store.append(rows))
        .and_then(|_| {
            for &level in &levels {
                graph.push_node(level)?;
            }
            Ok(())
        });
    if let Err(e) = reserved {
        store.truncate(first);
        graph.truncate(first);
        *sampler = saved_sampler;
        return Err(e);
    }

    let ids = first..store.len();
    let graph: &Graph = graph;
    let store: &VectorStore = store;
    let builder = GraphBuilder::new(graph, store, params.metric, params.ef_construction);

    let threads = params.threads.max(1).min(ids.len().max(1));
    if threads == 1 || ids.len() < 2 {
        let mut list = visited.acquire(graph.len());
        let mut scratch = BuildScratch::default();
        for id in ids.clone() {
            builder.insert(id as u32, &mut list, &mut scratch);
        }
    } else {
        insert_parallel(&builder, graph, visited, ids.clone(), threads);
    }

    debug!(
        "Inserted {} nodes; layer sizes {:?}, entry point {:?}",
        ids.len(),
        graph.layer_sizes(),
        graph.entry_point()
    );
    Ok(ids)
}

fn insert_parallel(
    builder: &GraphBuilder<'_>,
    graph: &Graph,
    visited: &VisitedPool,
    ids: Range<usize>,
    threads: usize,
) {
    let mut start = ids.start;
    if graph.entry_point().is_none() {
        let mut list = visited.acquire(graph.len());
        builder.insert(start as u32, &mut list, &mut BuildScratch::default());
        start += 1;
    }

    let next = AtomicUsize::new(start);
    let end = ids.end;
    let scoped = crossbeam_utils::thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|_| {
                let mut list = visited.acquire(graph.len());
                let mut scratch = BuildScratch::default();
                loop {
                    let id = next.fetch_add(1, Ordering::Relaxed);
                    if id >= end {
                        break;
                    }
                    builder.insert(id as u32, &mut list, &mut scratch);
                }
            });
        }
    });
    if let Err(panic) = scoped {
        std::panic::resume_unwind(panic);
    }

    // Two shrinks racing on the same pair can leave an edge on one side only.
    let removed = graph.drop_one_sided_edges();
    if removed > 0 {
        debug!("Dropped {} one-sided edges after parallel insert", removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::index::distance::MetricType;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_data(rows: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..rows * dim).map(|_| rng.gen::<f32>()).collect()
    }

    fn build(data: &[f32], dim: usize, m: usize, threads: usize, seed: u64) -> (Graph, VectorStore) {
        build_with(data, dim, m, 40, threads, seed)
    }

    fn build_with(
        data: &[f32],
        dim: usize,
        m: usize,
        ef_construction: usize,
        threads: usize,
        seed: u64,
    ) -> (Graph, VectorStore) {
        let mut graph = Graph::new(m);
        let mut store = VectorStore::new(dim);
        let mut sampler = LevelSampler::new(m, seed);
        let pool = VisitedPool::new();
        let params = BuildParams {
            metric: MetricFunction::new(MetricType::L2),
            ef_construction,
            threads,
        };
        let rows = Dataset::from_tensor(dim, data).checked("train", dim as i64).unwrap();
        insert_rows(&mut graph, &mut store, &rows, &mut sampler, &pool, params).unwrap();
        (graph, store)
    }

    #[test]
    fn test_build_keeps_invariants() {
        let data = random_data(500, 8, 1);
        let (graph, store) = build(&data, 8, 6, 1, 100);

        assert_eq!(store.len(), 500);
        graph.check_invariants(500).unwrap();
        assert!(graph.is_symmetric());
    }

    #[test]
    fn test_tiny_dataset_caps_degree() {
        let data = random_data(3, 4, 2);
        let (graph, _) = build(&data, 4, 16, 1, 100);

        graph.check_invariants(3).unwrap();
        for node in graph.nodes() {
            assert_eq!(node.neighbors(0).len(), 2);
        }
    }

    #[test]
    fn test_same_seed_same_graph() {
        let data = random_data(300, 6, 3);
        let (a, _) = build(&data, 6, 5, 1, 42);
        let (b, _) = build(&data, 6, 5, 1, 42);

        assert_eq!(a.entry_point(), b.entry_point());
        for (x, y) in a.nodes().iter().zip(b.nodes()) {
            assert_eq!(x.level(), y.level());
            for layer in 0..=x.level() {
                assert_eq!(x.neighbors(layer), y.neighbors(layer));
            }
        }
    }

    #[test]
    fn test_parallel_build_is_valid() {
        let data = random_data(800, 8, 4);
        let (graph, _) = build(&data, 8, 8, 4, 7);

        graph.check_invariants(800).unwrap();
        assert!(graph.is_symmetric());
    }

    #[test]
    fn test_parallel_builds_respect_degree_bound() {
        // Small M and many threads make concurrent links into a node that is
        // still being inserted common.
        let data = random_data(400, 4, 8);
        for seed in 0..40 {
            let (graph, _) = build_with(&data, 4, 2, 8, 8, seed);
            if let Err(e) = graph.check_invariants(400) {
                panic!("seed {}: {}", seed, e);
            }
            assert!(graph.is_symmetric(), "seed {}", seed);
        }
    }

    #[test]
    fn test_connect_shrinks_a_full_list() {
        let data = [0.0f32, 1.0, 2.0, 3.0, -0.5];
        let mut store = VectorStore::new(1);
        store
            .append(&Dataset::from_tensor(1, &data).checked("add", 1).unwrap())
            .unwrap();
        let mut graph = Graph::new(1);
        graph.reserve(5).unwrap();
        for _ in 0..5 {
            graph.push_node(0).unwrap();
        }
        let builder = GraphBuilder::new(&graph, &store, MetricFunction::new(MetricType::L2), 10);
        let mut scratch = BuildScratch::default();

        // Layer 0 holds 2 links for M = 1.
        for n in [1, 2] {
            assert!(builder.connect(0, n, 0, &mut scratch));
            assert!(builder.connect(n, 0, 0, &mut scratch));
        }
        assert!(!builder.connect(0, 3, 0, &mut scratch));
        assert_eq!(graph.node(0).neighbors(0), vec![1, 2]);

        assert!(builder.connect(0, 4, 0, &mut scratch));
        let list = graph.node(0).neighbors(0);
        assert_eq!(list.len(), 2);
        assert!(list.contains(&4));
        let evicted = if list.contains(&1) { 2 } else { 1 };
        assert!(!graph.node(evicted).neighbors(0).contains(&0));
    }

    #[test]
    fn test_appending_extends_existing_graph() {
        let data = random_data(200, 4, 5);
        let mut graph = Graph::new(4);
        let mut store = VectorStore::new(4);
        let mut sampler = LevelSampler::new(4, 100);
        let pool = VisitedPool::new();
        let params = BuildParams {
            metric: MetricFunction::new(MetricType::InnerProduct),
            ef_construction: 20,
            threads: 1,
        };

        let (head, tail) = data.split_at(100 * 4);
        for part in [head, tail] {
            let rows = Dataset::from_tensor(4, part).checked("add", 4).unwrap();
            insert_rows(&mut graph, &mut store, &rows, &mut sampler, &pool, params).unwrap();
        }
        assert_eq!(store.len(), 200);
        graph.check_invariants(200).unwrap();
        assert!(graph.is_symmetric());
    }

    #[test]
    fn test_heuristic_skips_shadowed_candidates() {
        // Base at 0; 1.0 and 1.1 sit together, 3.0 on the far side is kept
        // even though 1.1 is closer to the base.
        let data = [0.0f32, 1.0, 1.1, -3.0];
        let mut store = VectorStore::new(1);
        store
            .append(&Dataset::from_tensor(1, &data).checked("add", 1).unwrap())
            .unwrap();
        let graph = Graph::new(2);
        let builder = GraphBuilder::new(&graph, &store, MetricFunction::new(MetricType::L2), 10);

        let candidates: Vec<Candidate> = [1u32, 2, 3]
            .iter()
            .map(|&id| Candidate {
                score: data[id as usize] * data[id as usize],
                id,
            })
            .collect();
        let mut scratch = BuildScratch::default();
        builder.select_neighbors(&candidates, 2, &mut scratch);
        let ids: Vec<u32> = scratch.selected.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3]);

        builder.select_neighbors(&candidates, 3, &mut scratch);
        let ids: Vec<u32> = scratch.selected.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }
}
