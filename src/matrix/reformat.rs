//! Whole-operand layout conversion.

use crate::matrix::MatrixRef;
use crate::matrix::layout::Layout;

/// What to do with destination positions that hold no logical element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gaps {
    /// Write `T::default()` (padding of a reformatted copy).
    Zero,
    /// Leave untouched (stride gaps of a caller-owned buffer).
    Keep,
}

/// Copies `src` into the slice `dst`, which covers offsets
/// `[start, start + dst.len())` of a buffer laid out as `dst_layout`.
///
/// Chunks of one destination buffer can be converted independently, which is
/// how the padding pass splits the work across vector units.
pub fn reformat_range<T: Copy + Default>(
    src: &MatrixRef<'_, T>,
    dst: &mut [T],
    dst_layout: &Layout,
    start: usize,
    gaps: Gaps,
) {
    debug_assert_eq!((src.rows(), src.cols()), (dst_layout.rows, dst_layout.cols));
    for (i, slot) in dst.iter_mut().enumerate() {
        match dst_layout.coord_at(start + i) {
            Some((r, c)) => *slot = src.get(r, c),
            None if gaps == Gaps::Zero => *slot = T::default(),
            None => {}
        }
    }
}

/// Copies the whole of `src` into `dst` laid out as `dst_layout`.
///
/// # Example
///
/// ```
/// use tilegemm::matrix::MatrixRef;
/// use tilegemm::matrix::layout::Layout;
/// use tilegemm::matrix::reformat::{reformat, Gaps};
///
/// let src = vec![1.0, 2.0, 3.0,   // 2×3 row-major
///                4.0, 5.0, 6.0];
/// let view = MatrixRef::new(&src, Layout::row_major(2, 3), 'A').unwrap();
/// let mut dst = vec![0.0; 6];
///
/// reformat(&view, &mut dst, &Layout::column_major(2, 3), Gaps::Zero);
///
/// assert_eq!(dst, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
/// ```
pub fn reformat<T: Copy + Default>(src: &MatrixRef<'_, T>, dst: &mut [T], dst_layout: &Layout, gaps: Gaps) {
    let len = dst_layout.capacity().min(dst.len());
    reformat_range(src, &mut dst[..len], dst_layout, 0, gaps);
}
