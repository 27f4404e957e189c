use anyhow::{bail, ensure, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use hnsw_core::{
    BinarySet, Dataset, HnswIndex, IndexConfig, MetricType, QueryResult, VectorIndex,
    RAW_VECTORS, SENTINEL_ID,
};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "HNSW index performance harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Train, persist, load and check query results, then retrain on a truncated dataset.
    Scenario(Params),
    /// Build once, then time repeated batch queries.
    Throughput {
        #[command(flatten)]
        params: Params,

        #[arg(long, default_value_t = 1000)]
        query_times: usize,
    },
}

#[derive(ClapArgs, Debug, Clone)]
struct Params {
    #[arg(long, default_value_t = 128)]
    dim: usize,

    #[arg(long, default_value_t = 100_000)]
    nb: usize,

    #[arg(long, default_value_t = 10)]
    nq: usize,

    #[arg(short = 'k', long, default_value_t = 50)]
    top_k: usize,

    #[arg(short = 'm', long, default_value_t = 12)]
    m: usize,

    #[arg(long, default_value_t = 150)]
    ef_construction: usize,

    #[arg(long, default_value_t = 50)]
    ef: usize,

    /// L2 or IP
    #[arg(long, default_value = "L2")]
    metric: MetricType,

    #[arg(long, default_value_t = 100)]
    seed: u64,

    /// Insertion threads (0 = all cores)
    #[arg(long, default_value_t = 1)]
    build_threads: usize,

    /// Batch query threads (0 = all cores)
    #[arg(long, default_value_t = 1)]
    query_threads: usize,

    /// Rows kept for the truncated retrain
    #[arg(long, default_value_t = 6)]
    truncate_to: usize,

    /// Lowest fraction of queries whose first hit must be the query row
    #[arg(long, default_value_t = 0.5)]
    min_self_hit_rate: f64,
}

impl Params {
    fn config(&self) -> IndexConfig {
        IndexConfig::new(self.dim as i64, self.top_k as i64, self.metric)
            .with_m(self.m as i64)
            .with_ef_construction(self.ef_construction as i64)
            .with_ef(self.ef as i64)
            .with_seed(self.seed)
            .with_build_threads(self.build_threads)
            .with_query_threads(self.query_threads)
    }
}

/// Base vectors uniform in [0, 1); queries are the first `nq` base rows.
fn generate(params: &Params) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(params.seed);
    (0..params.nb * params.dim).map(|_| rng.gen::<f32>()).collect()
}

/// Builds an index over `data`, persists it the way an external store
/// would (topology from the index, raw vectors from the caller) and loads
/// the blobs into a fresh index.
fn build_and_reload(data: &[f32], params: &Params, config: &IndexConfig) -> Result<(HnswIndex, Timings)> {
    let dataset = Dataset::from_tensor(params.dim, data);
    let index = HnswIndex::new();

    let started = Instant::now();
    index.train(&dataset, config).context("train failed")?;
    let build = started.elapsed();

    let count = index.count()?;
    let dim = index.dim()?;
    ensure!(count == params.nb as i64, "count {} != nb {}", count, params.nb);
    ensure!(dim == params.dim as i64, "dim {} != {}", dim, params.dim);

    let started = Instant::now();
    let mut blobs: BinarySet = index.serialize(config).context("serialize failed")?;
    blobs.append(RAW_VECTORS, dataset.raw_vectors_blob());
    let persisted = blobs.total_size();

    let loaded = HnswIndex::new();
    loaded.load(&blobs).context("load failed")?;
    let load = started.elapsed();
    info!("Round-tripped {} bytes of index state", persisted);

    Ok((loaded, Timings { build, load, persisted }))
}

struct Timings {
    build: Duration,
    load: Duration,
    persisted: usize,
}

fn check_rows(result: &QueryResult, params: &Params) -> Result<usize> {
    let mut self_hits = 0;
    for row in 0..result.nq() {
        let ids = result.row_ids(row);
        if let Some(slot) = ids.iter().position(|&id| id == SENTINEL_ID) {
            bail!("row {} has a sentinel at slot {} with nb = {}", row, slot, params.nb);
        }
        let d = result.row_distances(row);
        let ordered = d.windows(2).all(|w| match params.metric {
            MetricType::L2 => w[0] <= w[1],
            MetricType::InnerProduct => w[0] >= w[1],
        });
        ensure!(ordered, "row {} is not ordered: {:?}", row, d);
        if ids[0] == row as i64 {
            self_hits += 1;
        }
    }
    Ok(self_hits)
}

fn run_scenario(params: &Params) -> Result<()> {
    ensure!(params.nq <= params.nb, "nq must not exceed nb");
    ensure!(params.truncate_to < params.top_k, "truncate-to must be below k");
    ensure!(
        (0.0..=1.0).contains(&params.min_self_hit_rate),
        "min-self-hit-rate must be within [0, 1]"
    );
    let config = params.config();
    let data = generate(params);

    let (index, timings) = build_and_reload(&data, params, &config)?;
    let queries = Dataset::from_tensor(params.dim, &data).with_rows(params.nq as i64);

    let started = Instant::now();
    let result = index.query(&queries, &config, None).context("query failed")?;
    let latency = started.elapsed();
    let self_hits = check_rows(&result, params)?;

    // Shrink the dataset in place and retrain: the tail of every row must pad.
    let truncated = Dataset::from_tensor(params.dim, &data).with_rows(params.truncate_to as i64);
    index.train(&truncated, &config).context("retrain failed")?;
    let padded = index.query(&queries, &config, None)?;
    for row in 0..padded.nq() {
        let tail = &padded.row_ids(row)[params.truncate_to..];
        ensure!(
            tail.iter().all(|&id| id == SENTINEL_ID),
            "row {} tail is not padded: {:?}",
            row,
            tail
        );
        ensure!(
            padded.valid_in_row(row) == params.truncate_to,
            "row {} has {} valid slots",
            row,
            padded.valid_in_row(row)
        );
    }

    let self_hit_rate = if params.nq == 0 {
        1.0
    } else {
        self_hits as f64 / params.nq as f64
    };
    let status = if self_hit_rate >= params.min_self_hit_rate {
        "PASS"
    } else {
        "FAIL"
    };
    println!("\n==================================================");
    println!("          HNSW SCENARIO RECEIPT                   ");
    println!("==================================================");
    println!(" [ BLOCK 1: TEST CONFIGURATION ]");
    println!(" Vectors:      {} x {} ({})", params.nb, params.dim, params.metric);
    println!(" Graph:        M = {}, efConstruction = {}", params.m, params.ef_construction);
    println!(" Query:        nq = {}, k = {}, ef = {}", params.nq, params.top_k, params.ef);
    println!("--------------------------------------------------");
    println!(" [ BLOCK 2: EXECUTION INTEGRITY ]");
    println!(" Status:       {}", status);
    println!(
        " Self Hits:    {}/{} ({:.1}%, floor {:.1}%)",
        self_hits,
        params.nq,
        self_hit_rate * 100.0,
        params.min_self_hit_rate * 100.0
    );
    println!(" Padded Rows:  {}/{}", padded.nq(), params.nq);
    println!("--------------------------------------------------");
    println!(" [ BLOCK 3: PERFORMANCE METRICS ]");
    println!(" Build:        {:.2?}", timings.build);
    println!(" Load:         {:.2?} ({} bytes)", timings.load, timings.persisted);
    println!(" Query Batch:  {:.2?}", latency);
    println!("==================================================\n");

    ensure!(
        self_hit_rate >= params.min_self_hit_rate,
        "only {} of {} queries found themselves first (floor {:.2})",
        self_hits,
        params.nq,
        params.min_self_hit_rate
    );
    Ok(())
}

fn run_throughput(params: &Params, query_times: usize) -> Result<()> {
    ensure!(query_times > 0, "query-times must be positive");
    let config = params.config();
    let data = generate(params);
    let (index, timings) = build_and_reload(&data, params, &config)?;
    let queries = Dataset::from_tensor(params.dim, &data).with_rows(params.nq as i64);

    println!("start query...");
    let mut latencies = Vec::with_capacity(query_times);
    let started = Instant::now();
    for _ in 0..query_times {
        let t = Instant::now();
        index.query(&queries, &config, None)?;
        latencies.push(t.elapsed());
    }
    let total = started.elapsed();

    latencies.sort();
    let count = latencies.len();
    let avg = total / count as u32;
    let p50 = latencies[count / 2];
    let p99 = latencies[((count as f64 * 0.99) as usize).min(count - 1)];
    let qps = (query_times * params.nq) as f64 / total.as_secs_f64();

    println!("\n==================================================");
    println!("          HNSW THROUGHPUT RECEIPT                 ");
    println!("==================================================");
    println!(" Vectors:      {} x {} ({})", params.nb, params.dim, params.metric);
    println!(" Build:        {:.2?}", timings.build);
    println!(" Load:         {:.2?}", timings.load);
    println!(" Batches:      {} x {} queries", query_times, params.nq);
    println!("--------------------------------------------------");
    println!(" Wall Clock:   {:.2?}", total);
    println!(" Throughput:   {:.2} queries/sec", qps);
    println!(" Average:      {:.2?} per batch", avg);
    println!(" P50 (Median): {:.2?}", p50);
    println!(" P99 (Tail):   {:.2?}", p99);
    println!("==================================================\n");
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.mode {
        Mode::Scenario(params) => run_scenario(params),
        Mode::Throughput {
            params,
            query_times,
        } => run_throughput(params, *query_times),
    }
}
