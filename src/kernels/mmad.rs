//! Multiply-accumulate block: L0C += L0A × L0B.

use crate::element::Accumulator;

/// Rows of A processed together, sharing each row of B while it is hot.
const ROW_BLOCK: usize = 4;

/// Computes `c[m×n] += a[m×k] × b[k×n]`, all row-major and dense.
///
/// Register-blocked over 4 rows of A: for every `p`, the row `b[p, ..]` is
/// streamed once per block of rows. Each output element still receives its
/// products in ascending `p`, so the result does not depend on the blocking.
pub fn mmad<A: Accumulator>(c: &mut [A], a: &[A], b: &[A], m: usize, n: usize, k: usize) {
    debug_assert!(c.len() >= m * n && a.len() >= m * k && b.len() >= k * n);
    for i0 in (0..m).step_by(ROW_BLOCK) {
        let i1 = (i0 + ROW_BLOCK).min(m);
        for p in 0..k {
            let b_row = &b[p * n..(p + 1) * n];
            for i in i0..i1 {
                A::axpy(&mut c[i * n..(i + 1) * n], a[i * k + p], b_row);
            }
        }
    }
}

/// `acc[j] = acc[j] + a * b[j]` with AVX2, four lanes at a time.
///
/// Multiply and add are separate instructions: no FMA, so each lane rounds
/// exactly like the scalar expression.
///
/// # Safety
///
/// Caller must ensure the CPU supports AVX2.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[allow(unsafe_op_in_unsafe_fn)]
pub unsafe fn axpy_f64_avx2(acc: &mut [f64], a: f64, b: &[f64]) {
    use std::arch::x86_64::*;

    let n = acc.len().min(b.len());
    let a_vec = _mm256_set1_pd(a);
    let acc_ptr = acc.as_mut_ptr();
    let b_ptr = b.as_ptr();

    let mut j = 0;
    while j + 4 <= n {
        let b_vec = _mm256_loadu_pd(b_ptr.add(j));
        let c_vec = _mm256_loadu_pd(acc_ptr.add(j));
        _mm256_storeu_pd(acc_ptr.add(j), _mm256_add_pd(c_vec, _mm256_mul_pd(a_vec, b_vec)));
        j += 4;
    }

    // Tail
    while j < n {
        *acc_ptr.add(j) += a * *b_ptr.add(j);
        j += 1;
    }
}
