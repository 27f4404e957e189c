use hnsw_core::{
    BinarySet, Bitset, Dataset, ErrorKind, HnswIndex, IndexConfig, IndexError, MetricType,
    VectorIndex, RAW_VECTORS, SENTINEL_ID, TOPOLOGY,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn random_vectors(rows: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..rows * dim).map(|_| rng.gen::<f32>()).collect()
}

fn trained(data: &[f32], config: &IndexConfig) -> HnswIndex {
    let index = HnswIndex::new();
    index
        .train(&Dataset::from_tensor(config.dim as usize, data), config)
        .unwrap();
    index
}

/// Serialize the way a harness does: topology from the index, raw vectors
/// from the caller's copy of the dataset.
fn persist(index: &HnswIndex, data: &[f32], config: &IndexConfig) -> BinarySet {
    let mut blobs = index.serialize(config).unwrap();
    assert!(blobs.contains(TOPOLOGY));
    assert!(!blobs.contains(RAW_VECTORS));
    let dataset = Dataset::from_tensor(config.dim as usize, data);
    blobs.append(RAW_VECTORS, dataset.raw_vectors_blob());
    blobs
}

fn brute_force(data: &[f32], dim: usize, query: &[f32], k: usize) -> Vec<usize> {
    let mut scored: Vec<(f32, usize)> = data
        .chunks(dim)
        .enumerate()
        .map(|(id, row)| {
            let d: f32 = row.iter().zip(query).map(|(a, b)| (a - b) * (a - b)).sum();
            (d, id)
        })
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, id)| id).collect()
}

#[test]
fn test_round_trip_preserves_results() {
    init_logger();
    let dim = 16;
    let data = random_vectors(2000, dim, 1);
    let config = IndexConfig::new(dim as i64, 10, MetricType::L2)
        .with_m(12)
        .with_ef_construction(100)
        .with_ef(40);
    let index = trained(&data, &config);

    let restored = HnswIndex::new();
    restored.load(&persist(&index, &data, &config)).unwrap();
    assert_eq!(restored.count().unwrap(), 2000);
    assert_eq!(restored.dim().unwrap(), dim as i64);

    let queries = random_vectors(30, dim, 2);
    let queries = Dataset::from_tensor(dim, &queries);
    assert_eq!(
        index.query(&queries, &config, None).unwrap(),
        restored.query(&queries, &config, None).unwrap()
    );
}

#[test]
fn test_count_tracks_train_and_add() {
    init_logger();
    let dim = 8;
    let data = random_vectors(700, dim, 3);
    let config = IndexConfig::new(dim as i64, 5, MetricType::L2);
    let (head, tail) = data.split_at(500 * dim);

    let index = trained(head, &config);
    assert_eq!(index.count().unwrap(), 500);

    index
        .add_without_ids(&Dataset::from_tensor(dim, tail), &config)
        .unwrap();
    assert_eq!(index.count().unwrap(), 700);

    // New rows are reachable under their appended ids.
    let query = Dataset::from_tensor(dim, &tail[..dim]);
    let result = index.query(&query, &config, None).unwrap();
    assert_eq!(result.row_ids(0)[0], 500);

    // Retraining replaces rather than extends.
    index.train(&Dataset::from_tensor(dim, tail), &config).unwrap();
    assert_eq!(index.count().unwrap(), 200);
}

#[test]
fn test_undersupplied_rows_are_padded() {
    init_logger();
    let dim = 4;
    let data = random_vectors(4, dim, 4);
    let config = IndexConfig::new(dim as i64, 10, MetricType::L2);
    let index = trained(&data, &config);

    let result = index
        .query(&Dataset::from_tensor(dim, &data), &config, None)
        .unwrap();
    for row in 0..4 {
        let ids = result.row_ids(row);
        assert!(ids[..4].iter().all(|&id| id != SENTINEL_ID));
        assert!(ids[4..].iter().all(|&id| id == SENTINEL_ID));
        let found: HashSet<i64> = ids[..4].iter().copied().collect();
        assert_eq!(found.len(), 4);
    }
}

#[test]
fn test_rows_are_ordered_for_both_metrics() {
    init_logger();
    let dim = 12;
    let data = random_vectors(1500, dim, 5);
    let queries = random_vectors(20, dim, 6);

    for metric in [MetricType::L2, MetricType::InnerProduct] {
        let config = IndexConfig::new(dim as i64, 25, metric).with_ef(60);
        let index = trained(&data, &config);
        let result = index
            .query(&Dataset::from_tensor(dim, &queries), &config, None)
            .unwrap();

        for row in 0..20 {
            assert_eq!(result.valid_in_row(row), 25);
            let d = result.row_distances(row);
            let ordered = d.windows(2).all(|w| match metric {
                MetricType::L2 => w[0] <= w[1],
                MetricType::InnerProduct => w[0] >= w[1],
            });
            assert!(ordered, "{} row {} out of order: {:?}", metric, row, d);
        }
    }
}

#[test]
fn test_recall_against_brute_force() {
    init_logger();
    let dim = 16;
    let data = random_vectors(3000, dim, 7);
    let queries = random_vectors(25, dim, 8);
    let config = IndexConfig::new(dim as i64, 10, MetricType::L2)
        .with_ef_construction(120)
        .with_ef(64);
    let index = trained(&data, &config);
    let result = index
        .query(&Dataset::from_tensor(dim, &queries), &config, None)
        .unwrap();

    let mut hits = 0;
    for (row, query) in queries.chunks(dim).enumerate() {
        let truth: HashSet<usize> = brute_force(&data, dim, query, 10).into_iter().collect();
        hits += result
            .row_ids(row)
            .iter()
            .filter(|&&id| truth.contains(&(id as usize)))
            .count();
    }
    let recall = hits as f64 / 250.0;
    assert!(recall >= 0.9, "recall@10 = {:.3}", recall);
}

#[test]
fn test_excluded_ids_never_returned() {
    init_logger();
    let dim = 8;
    let data = random_vectors(600, dim, 9);
    let config = IndexConfig::new(dim as i64, 20, MetricType::L2).with_ef(40);
    let index = trained(&data, &config);

    // Exclude every even id.
    let excluded = Bitset::from_ids(600, (0..600).step_by(2));
    let result = index
        .query(
            &Dataset::from_tensor(dim, &data).with_rows(10),
            &config,
            Some(&excluded),
        )
        .unwrap();
    for row in 0..10 {
        assert_eq!(result.valid_in_row(row), 20);
        assert!(result.row_ids(row).iter().all(|&id| id % 2 == 1));
    }

    // With nearly everything excluded the survivors still fill the row.
    let survivors: HashSet<usize> = [17, 301, 599].into_iter().collect();
    let almost_all: HashSet<usize> = (0..600).filter(|id| !survivors.contains(id)).collect();
    let result = index
        .query(
            &Dataset::from_tensor(dim, &data).with_rows(2),
            &config,
            Some(&almost_all),
        )
        .unwrap();
    for row in 0..2 {
        assert_eq!(result.valid_in_row(row), 3);
        let ids: HashSet<usize> = result.row_ids(row)[..3].iter().map(|&id| id as usize).collect();
        assert_eq!(ids, survivors);
    }
}

#[test]
fn test_builds_and_queries_are_deterministic() {
    init_logger();
    let dim = 10;
    let data = random_vectors(1000, dim, 10);
    let queries = random_vectors(15, dim, 11);
    let queries = Dataset::from_tensor(dim, &queries);
    let config = IndexConfig::new(dim as i64, 8, MetricType::InnerProduct).with_seed(1234);

    let a = trained(&data, &config);
    let b = trained(&data, &config);
    let first = a.query(&queries, &config, None).unwrap();
    assert_eq!(first, a.query(&queries, &config, None).unwrap());
    assert_eq!(first, b.query(&queries, &config, None).unwrap());
    assert_eq!(a.layer_sizes().unwrap(), b.layer_sizes().unwrap());
}

#[test]
fn test_parallel_build_answers_queries() {
    init_logger();
    let dim = 8;
    let data = random_vectors(1200, dim, 12);
    let config = IndexConfig::new(dim as i64, 5, MetricType::L2)
        .with_build_threads(4)
        .with_query_threads(0);
    let index = trained(&data, &config);

    let result = index
        .query(&Dataset::from_tensor(dim, &data).with_rows(50), &config, None)
        .unwrap();
    let self_hits = (0..50)
        .filter(|&row| result.row_ids(row)[0] == row as i64)
        .count();
    assert!(self_hits >= 48, "{} of 50 rows found themselves", self_hits);
}

#[test]
fn test_parallel_built_indexes_reload() {
    init_logger();
    let dim = 8;
    let data = random_vectors(2000, dim, 13);
    let queries = Dataset::from_tensor(dim, &data).with_rows(20);
    for seed in 0..12 {
        let config = IndexConfig::new(dim as i64, 5, MetricType::L2)
            .with_m(4)
            .with_ef_construction(32)
            .with_seed(seed)
            .with_build_threads(8);
        let index = trained(&data, &config);
        let expected = index.query(&queries, &config, None).unwrap();

        let blobs = index.serialize_with_raw_vectors(&config).unwrap();
        let loaded = HnswIndex::new();
        if let Err(e) = loaded.load(&blobs) {
            panic!("seed {}: {}", seed, e);
        }
        assert_eq!(loaded.count().unwrap(), 2000);
        assert_eq!(loaded.query(&queries, &config, None).unwrap(), expected, "seed {}", seed);
    }
}

#[test]
fn test_config_errors_carry_context() {
    init_logger();
    let data = random_vectors(20, 4, 13);
    let index = HnswIndex::new();

    let err = index
        .train(
            &Dataset::from_tensor(4, &data),
            &IndexConfig::new(4, 5, MetricType::L2).with_ef_construction(0),
        )
        .unwrap_err();
    assert!(matches!(err, IndexError::InvalidParameter { field: "efConstruction", .. }));

    let err = index
        .train(&Dataset::from_tensor(4, &data), &IndexConfig::new(4, 0, MetricType::L2))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(!index.is_ready());

    let config = IndexConfig::new(4, 5, MetricType::L2);
    index.train(&Dataset::from_tensor(4, &data), &config).unwrap();
    let err = index
        .query(&Dataset::new(4, 3, &data[..8]), &config, None)
        .unwrap_err();
    assert!(err.to_string().contains("expected at least 12, got 8"));

    let err = index.serialize(&IndexConfig::new(6, 5, MetricType::L2)).unwrap_err();
    assert!(matches!(err, IndexError::DimensionMismatch { context: "serialize", .. }));
}

#[test]
fn test_load_rejects_bad_blob_sets() {
    init_logger();
    let dim = 4;
    let data = random_vectors(50, dim, 14);
    let config = IndexConfig::new(dim as i64, 5, MetricType::L2);
    let index = trained(&data, &config);
    let good = persist(&index, &data, &config);

    let target = HnswIndex::new();
    let mut missing = good.clone();
    missing.remove(RAW_VECTORS);
    assert_eq!(target.load(&missing).unwrap_err().kind(), ErrorKind::Serialization);

    let mut short = good.clone();
    short.append(RAW_VECTORS, Dataset::from_tensor(dim, &data[..dim * 49]).raw_vectors_blob());
    let err = target.load(&short).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Serialization);
    assert!(err.to_string().contains("800"), "{}", err);

    let mut garbage = good.clone();
    garbage.append(TOPOLOGY, vec![0xAB; 64]);
    assert_eq!(target.load(&garbage).unwrap_err().kind(), ErrorKind::Serialization);
    assert!(!target.is_ready());

    target.load(&good).unwrap();
    assert!(target.is_ready());
}

/// Scenario A at reduced size, followed by Scenario B on the same index.
#[test]
fn test_truncated_retrain_pads_tail() {
    init_logger();
    let dim = 32;
    let (nb, nq, k) = (3000, 10, 50);
    let data = random_vectors(nb, dim, 15);
    let config = IndexConfig::new(dim as i64, k as i64, MetricType::L2)
        .with_m(12)
        .with_ef_construction(150)
        .with_ef(50);

    let mut dataset = Dataset::from_tensor(dim, &data);
    let index = HnswIndex::new();
    index.train(&dataset, &config).unwrap();
    assert_eq!(index.count().unwrap(), nb as i64);

    let restored = HnswIndex::new();
    restored.load(&persist(&index, &data, &config)).unwrap();
    let queries = Dataset::from_tensor(dim, &data).with_rows(nq as i64);
    let result = restored.query(&queries, &config, None).unwrap();
    assert_eq!(result.ids().len(), nq * k);
    let mut self_hits = 0;
    for row in 0..nq {
        assert_eq!(result.valid_in_row(row), k);
        assert!(result.row_distances(row).windows(2).all(|w| w[0] <= w[1]));
        if result.row_ids(row)[0] == row as i64 {
            self_hits += 1;
        }
    }
    assert!(self_hits >= nq - 1);

    dataset.set_rows(6);
    index.train(&dataset, &config).unwrap();
    let result = index.query(&queries, &config, None).unwrap();
    for row in 0..nq {
        let ids = result.row_ids(row);
        assert!(ids[..6].iter().all(|&id| (0..6).contains(&id)));
        assert!(ids[6..].iter().all(|&id| id == SENTINEL_ID));
    }
}
