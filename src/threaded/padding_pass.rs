//! Whole-operand reformat passes run on the vector units.
//!
//! The destination buffer is cut into equal chunks, one per vector unit, and
//! every chunk is converted independently with
//! [`reformat_range`](crate::matrix::reformat::reformat_range). Joining the
//! pass is the one-shot rendezvous after which the compute units may read the
//! padded copies.

use crate::error::{GemmError, Result};
use crate::matrix::MatrixRef;
use crate::matrix::layout::Layout;
use crate::matrix::reformat::{Gaps, reformat_range};
use crate::matrix::shape::ceil_div;
use crate::threaded::launch::panic_message;
use std::thread;

/// Below this many elements a pass runs on the calling thread.
const MIN_PARALLEL_ELEMENTS: usize = 1 << 14;

/// Reformats `src` into `dst` (laid out as `dst_layout`) using up to `units` threads.
pub fn pad_operand<T: Copy + Default + Send + Sync>(
    src: &MatrixRef<'_, T>,
    dst: &mut [T],
    dst_layout: &Layout,
    units: usize,
    gaps: Gaps,
) -> Result<()> {
    let len = dst_layout.capacity();
    if dst.len() < len {
        return Err(GemmError::WorkspaceTooSmall {
            required: len * size_of::<T>(),
            provided: dst.len() * size_of::<T>(),
        });
    }
    let dst = &mut dst[..len];
    if len == 0 {
        return Ok(());
    }

    let units = if len < MIN_PARALLEL_ELEMENTS { 1 } else { units.max(1) };
    if units == 1 {
        reformat_range(src, dst, dst_layout, 0, gaps);
        return Ok(());
    }

    let chunk = ceil_div(len, units);
    thread::scope(|scope| {
        let handles: Vec<_> = dst
            .chunks_mut(chunk)
            .enumerate()
            .map(|(i, part)| {
                scope.spawn(move || {
                    log::trace!("Vector unit {} started", i);
                    reformat_range(src, part, dst_layout, i * chunk, gaps);
                })
            })
            .collect();

        let mut result = Ok(());
        for (unit, handle) in handles.into_iter().enumerate() {
            if let Err(payload) = handle.join() {
                result = result.and(Err(GemmError::ExecutionFault {
                    unit,
                    message: format!("padding pass: {}", panic_message(payload.as_ref())),
                }));
            }
        }
        result
    })
}

/// Copies a padded C back into the caller's buffer, leaving stride gaps intact.
pub fn remove_padding<T: Copy + Default + Send + Sync>(
    padded: &MatrixRef<'_, T>,
    dst: &mut [T],
    dst_layout: &Layout,
    units: usize,
) -> Result<()> {
    pad_operand(padded, dst, dst_layout, units, Gaps::Keep)
}
