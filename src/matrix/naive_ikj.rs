use crate::element::Element;
use crate::matrix::{MatrixMut, MatrixRef};

/// Reference matrix multiplication using i-k-j loop order: C = A × B.
///
/// Every output element is accumulated in `T::Acc`, starting from zero and
/// adding `a[i][p] * b[p][j]` for `p = 0..k` in order, then converted to `T`
/// once. The tiled pipeline performs exactly this sequence when it visits K
/// sub-tiles in ascending order, so the two agree bit for bit.
///
/// Works for any operand layouts. This is the correctness baseline, not a
/// fast path.
///
/// # Panics
///
/// Panics if the operand dimensions disagree.
pub fn matmul_naive_ikj<T: Element>(a: &MatrixRef<'_, T>, b: &MatrixRef<'_, T>, c: &mut MatrixMut<'_, T>) {
    let (m, k) = (a.rows(), a.cols());
    let n = b.cols();
    assert_eq!(b.rows(), k, "B: expected {} rows, got {}", k, b.rows());
    assert_eq!(c.rows(), m, "C: expected {} rows, got {}", m, c.rows());
    assert_eq!(c.cols(), n, "C: expected {} cols, got {}", n, c.cols());

    let mut acc = vec![T::Acc::default(); n];
    for i in 0..m {
        acc.fill(T::Acc::default());
        for p in 0..k {
            let a_ip = a.get(i, p).to_acc();
            for (j, slot) in acc.iter_mut().enumerate() {
                *slot = *slot + a_ip * b.get(p, j).to_acc();
            }
        }
        for (j, &value) in acc.iter().enumerate() {
            c.set(i, j, T::from_acc(value));
        }
    }
}

/// Row-major convenience wrapper: `a` is m×k, `b` is k×n, `c` is m×n.
pub fn matmul_naive_row_major<T: Element>(a: &[T], b: &[T], c: &mut [T], m: usize, n: usize, k: usize) {
    use crate::matrix::layout::Layout;

    assert_eq!(a.len(), m * k, "A: expected {}x{}={} elements", m, k, m * k);
    assert_eq!(b.len(), k * n, "B: expected {}x{}={} elements", k, n, k * n);
    assert_eq!(c.len(), m * n, "C: expected {}x{}={} elements", m, n, m * n);

    let a = MatrixRef {
        data: a,
        layout: Layout::row_major(m, k),
        row0: 0,
        col0: 0,
        rows: m,
        cols: k,
    };
    let b = MatrixRef {
        data: b,
        layout: Layout::row_major(k, n),
        row0: 0,
        col0: 0,
        rows: k,
        cols: n,
    };
    let mut c = MatrixMut {
        data: c,
        layout: Layout::row_major(m, n),
    };
    matmul_naive_ikj(&a, &b, &mut c);
}
