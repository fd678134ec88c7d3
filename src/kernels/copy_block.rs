//! Tile copies between memory levels.
//!
//! ```text
//!   global (caller layout) ──gm_to_l1──▶ L1 slot (A: Zn, B: Nz, zero padded)
//!   L1 slot ──l1_to_l0a / l1_to_l0b──▶ L0A (m×k0) / L0B (k0×n), row-major, accumulator type
//!   L0C (m×n accumulator) ──l0c_to_gm──▶ global (caller or workspace layout)
//! ```

use crate::element::Element;
use crate::matrix::MatrixRef;
use crate::matrix::layout::{Layout, LayoutTag};
use crate::threaded::launch::SharedOutput;

/// Copies the tile view `src` into an L1 buffer laid out as `dst_layout`.
///
/// Positions of `dst_layout` outside the view are zeroed.
pub fn gm_to_l1<T: Copy + Default>(src: &MatrixRef<'_, T>, dst: &mut [T], dst_layout: &Layout) {
    let (rows, cols) = (src.rows(), src.cols());
    debug_assert!(rows <= dst_layout.rows && cols <= dst_layout.cols);
    let capacity = dst_layout.capacity();
    dst[..capacity].fill(T::default());

    match dst_layout.tag {
        // Row segments of a row-major source land as contiguous fractal rows.
        LayoutTag::Zn if src.row_segment(0, 0, cols).is_some() => {
            let bc = dst_layout.block_cols;
            for r in 0..rows {
                if let Some(segment) = src.row_segment(r, 0, cols) {
                    for (cb, chunk) in segment.chunks(bc).enumerate() {
                        let start = dst_layout.offset(r, cb * bc);
                        dst[start..start + chunk.len()].copy_from_slice(chunk);
                    }
                }
            }
        }
        LayoutTag::Nz if src.col_segment(0, 0, rows).is_some() => {
            let br = dst_layout.block_rows;
            for c in 0..cols {
                if let Some(segment) = src.col_segment(0, c, rows) {
                    for (rb, chunk) in segment.chunks(br).enumerate() {
                        let start = dst_layout.offset(rb * br, c);
                        dst[start..start + chunk.len()].copy_from_slice(chunk);
                    }
                }
            }
        }
        _ => {
            for r in 0..rows {
                for c in 0..cols {
                    dst[dst_layout.offset(r, c)] = src.get(r, c);
                }
            }
        }
    }
}

/// L1 A tile -> L0A: rows `0..rows`, K columns `k_start..k_start + k_len`,
/// written row-major (`rows × k_len`) and converted to the accumulator type.
pub fn l1_to_l0a<T: Element>(
    l1: &[T],
    l1_layout: &Layout,
    rows: usize,
    k_start: usize,
    k_len: usize,
    dst: &mut [T::Acc],
) {
    for r in 0..rows {
        let row = &mut dst[r * k_len..(r + 1) * k_len];
        for (p, slot) in row.iter_mut().enumerate() {
            *slot = l1[l1_layout.offset(r, k_start + p)].to_acc();
        }
    }
}

/// L1 B tile -> L0B: K rows `k_start..k_start + k_len`, columns `0..cols`,
/// written row-major (`k_len × cols`) and converted to the accumulator type.
pub fn l1_to_l0b<T: Element>(
    l1: &[T],
    l1_layout: &Layout,
    k_start: usize,
    k_len: usize,
    cols: usize,
    dst: &mut [T::Acc],
) {
    for p in 0..k_len {
        let row = &mut dst[p * cols..(p + 1) * cols];
        for (c, slot) in row.iter_mut().enumerate() {
            *slot = l1[l1_layout.offset(k_start + p, c)].to_acc();
        }
    }
}

/// Destination of an output tile in global memory.
#[derive(Debug, Clone, Copy)]
pub struct TileDst {
    /// Element offset of the destination matrix inside the shared buffer.
    pub base: usize,
    pub layout: Layout,
    pub row0: usize,
    pub col0: usize,
}

/// L0C -> global: converts the `rows × cols` accumulator tile and stores it.
///
/// # Safety
///
/// No other thread may write the destination elements of this tile concurrently.
pub unsafe fn l0c_to_gm<T: Element>(
    acc: &[T::Acc],
    rows: usize,
    cols: usize,
    out: &SharedOutput<'_, T>,
    dst: &TileDst,
) {
    for r in 0..rows {
        for c in 0..cols {
            let idx = dst.base + dst.layout.offset(dst.row0 + r, dst.col0 + c);
            unsafe { out.write(idx, T::from_acc(acc[r * cols + c])) };
        }
    }
}

/// L0C -> global without conversion, used for split-K partial sums.
///
/// # Safety
///
/// Same contract as [`l0c_to_gm`].
pub unsafe fn l0c_to_partial<A: Copy>(
    acc: &[A],
    rows: usize,
    cols: usize,
    out: &SharedOutput<'_, A>,
    dst: &TileDst,
) {
    for r in 0..rows {
        for c in 0..cols {
            let idx = dst.base + dst.layout.offset(dst.row0 + r, dst.col0 + c);
            unsafe { out.write(idx, acc[r * cols + c]) };
        }
    }
}
