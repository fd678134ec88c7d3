//! Fixed pool of compute units and the shared output buffer.

use crate::error::{GemmError, Result};
use std::any::Any;
use std::marker::PhantomData;
use std::thread;

/// Output buffer shared by every compute unit of a launch.
///
/// Units only ever write disjoint elements (output tiles never overlap), so
/// handing out a raw pointer is sound as long as that holds.
pub struct SharedOutput<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

unsafe impl<T: Send> Send for SharedOutput<'_, T> {}
unsafe impl<T: Send> Sync for SharedOutput<'_, T> {}

impl<'a, T: Copy> SharedOutput<'a, T> {
    pub fn new(buf: &'a mut [T]) -> Self {
        Self {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    ///
    /// No other thread may access element `idx` concurrently.
    #[inline]
    pub unsafe fn write(&self, idx: usize, value: T) {
        assert!(idx < self.len, "output index {} out of bounds ({})", idx, self.len);
        unsafe { *self.ptr.add(idx) = value };
    }
}

/// Runs `body(unit)` on `unit_count` compute units and waits for all of them.
///
/// Every unit runs to completion even if another one fails; the first error
/// (by unit id) is returned. A panicking unit becomes
/// [`GemmError::ExecutionFault`].
pub fn launch_units<F>(unit_count: usize, label: &str, body: F) -> Result<()>
where
    F: Fn(usize) -> Result<()> + Sync,
{
    let unit_count = unit_count.max(1);
    thread::scope(|scope| {
        let body = &body;
        let mut handles = Vec::with_capacity(unit_count);
        for unit in 0..unit_count {
            let handle = thread::Builder::new()
                .name(format!("{label}-{unit}"))
                .spawn_scoped(scope, move || {
                    log::trace!("Compute unit {} ({}) started", unit, label);
                    let result = body(unit);
                    log::trace!("Compute unit {} ({}) stopped", unit, label);
                    result
                })?;
            handles.push(handle);
        }

        let mut first_error = None;
        for (unit, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.join() {
                Ok(result) => result,
                Err(payload) => Err(GemmError::ExecutionFault {
                    unit,
                    message: panic_message(payload.as_ref()),
                }),
            };
            if let Err(err) = outcome {
                log::debug!("Compute unit {} ({}) failed: {}", unit, label, err);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
