use hnsw_core::index::distance::{MetricFunction, MetricType};
use hnsw_core::index::simd;
use std::time::{Duration, Instant};

fn time(label: &str, iterations: usize, mut kernel: impl FnMut() -> f32) -> Duration {
    let start = Instant::now();
    let mut sum = 0.0;
    for _ in 0..iterations {
        sum += kernel();
    }
    let elapsed = start.elapsed();
    println!("{:<24} {:?} (Dummy sum: {})", label, elapsed, sum);
    elapsed
}

fn main() {
    let n = 128; // Standard dimension
    let iterations = 10_000_000;

    let a: Vec<f32> = (0..n).map(|i| (i as f32 * 0.37).sin()).collect();
    let b: Vec<f32> = (0..n).map(|i| (i as f32 * 0.11).cos()).collect();
    let l2 = MetricFunction::new(MetricType::L2);
    let ip = MetricFunction::new(MetricType::InnerProduct);

    println!("Benchmarking distance kernels (dim {}, {} iterations)...", n, iterations);
    let scalar_dot = time("Scalar dot", iterations, || simd::scalar_dot(&a, &b));
    let dispatched_dot = time("Dispatched dot", iterations, || ip.score(&a, &b));
    let scalar_l2 = time("Scalar L2", iterations, || simd::scalar_l2_sqr(&a, &b));
    let dispatched_l2 = time("Dispatched L2", iterations, || l2.score(&a, &b));

    println!(
        "\nSpeedup: dot {:.2}x, L2 {:.2}x",
        scalar_dot.as_secs_f64() / dispatched_dot.as_secs_f64(),
        scalar_l2.as_secs_f64() / dispatched_l2.as_secs_f64()
    );
}
