#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Distance kernel over two slices of equal length.
pub type KernelFn = fn(&[f32], &[f32]) -> f32;

/// Scalar dot product.
pub fn scalar_dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scalar squared Euclidean distance.
pub fn scalar_l2_sqr(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Horizontal sum of the 8 lanes of a YMM register.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn hsum256(v: __m256) -> f32 {
    let upper = _mm256_extractf128_ps(v, 1);
    let lower = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(upper, lower);
    let sum_h = _mm_hadd_ps(sum128, sum128);
    let final_vector = _mm_hadd_ps(sum_h, sum_h);
    _mm_cvtss_f32(final_vector)
}

/// AVX2 dot product, 8 lanes per step with FMA.
///
/// # Safety
/// The CPU must support AVX2 and FMA.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub unsafe fn avx2_dot(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let (pa, pb) = (a.as_ptr(), b.as_ptr());
    let mut acc0 = _mm256_setzero_ps();
    let mut acc1 = _mm256_setzero_ps();
    let mut acc2 = _mm256_setzero_ps();
    let mut acc3 = _mm256_setzero_ps();

    let mut i = 0;
    // 4 accumulators x 8 floats
    while i + 32 <= n {
        acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), acc0);
        acc1 = _mm256_fmadd_ps(
            _mm256_loadu_ps(pa.add(i + 8)),
            _mm256_loadu_ps(pb.add(i + 8)),
            acc1,
        );
        acc2 = _mm256_fmadd_ps(
            _mm256_loadu_ps(pa.add(i + 16)),
            _mm256_loadu_ps(pb.add(i + 16)),
            acc2,
        );
        acc3 = _mm256_fmadd_ps(
            _mm256_loadu_ps(pa.add(i + 24)),
            _mm256_loadu_ps(pb.add(i + 24)),
            acc3,
        );
        i += 32;
    }

    while i + 8 <= n {
        acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), acc0);
        i += 8;
    }

    acc0 = _mm256_add_ps(acc0, acc1);
    acc2 = _mm256_add_ps(acc2, acc3);
    acc0 = _mm256_add_ps(acc0, acc2);
    let mut result = hsum256(acc0);

    // Tail
    while i < n {
        result += a[i] * b[i];
        i += 1;
    }
    result
}

/// AVX2 squared Euclidean distance, 8 lanes per step with FMA.
///
/// # Safety
/// The CPU must support AVX2 and FMA.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub unsafe fn avx2_l2_sqr(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let (pa, pb) = (a.as_ptr(), b.as_ptr());
    let mut acc0 = _mm256_setzero_ps();
    let mut acc1 = _mm256_setzero_ps();

    let mut i = 0;
    while i + 16 <= n {
        let d0 = _mm256_sub_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)));
        let d1 = _mm256_sub_ps(_mm256_loadu_ps(pa.add(i + 8)), _mm256_loadu_ps(pb.add(i + 8)));
        acc0 = _mm256_fmadd_ps(d0, d0, acc0);
        acc1 = _mm256_fmadd_ps(d1, d1, acc1);
        i += 16;
    }

    while i + 8 <= n {
        let d = _mm256_sub_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)));
        acc0 = _mm256_fmadd_ps(d, d, acc0);
        i += 8;
    }

    let mut sum = hsum256(_mm256_add_ps(acc0, acc1));

    while i < n {
        let d = a[i] - b[i];
        sum += d * d;
        i += 1;
    }
    sum
}

#[cfg(target_arch = "x86_64")]
fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
    // SAFETY: only handed out by `dot_kernel` after feature detection.
    unsafe { avx2_dot(a, b) }
}

#[cfg(target_arch = "x86_64")]
fn l2_sqr_avx2(a: &[f32], b: &[f32]) -> f32 {
    // SAFETY: only handed out by `l2_kernel` after feature detection.
    unsafe { avx2_l2_sqr(a, b) }
}

#[cfg(target_arch = "x86_64")]
fn has_avx2_fma() -> bool {
    is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
}

/// Best dot-product kernel for this CPU.
pub fn dot_kernel() -> KernelFn {
    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2_fma() {
            return dot_avx2;
        }
    }

    scalar_dot
}

/// Best squared-L2 kernel for this CPU.
pub fn l2_kernel() -> KernelFn {
    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2_fma() {
            return l2_sqr_avx2;
        }
    }

    scalar_l2_sqr
}
