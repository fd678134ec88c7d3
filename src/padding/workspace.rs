//! Scratch memory for padded operands and split-K partial sums.

use crate::element::Element;
use crate::error::{GemmError, Result};
use std::mem::size_of;

/// Workspace requirement in elements.
///
/// `a`, `b` and `c` are element buffers holding padded copies of the
/// operands; `partial` is an accumulator-typed buffer for split-K slices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkspaceSize {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub partial: usize,
}

impl WorkspaceSize {
    pub fn is_empty(&self) -> bool {
        self.a == 0 && self.b == 0 && self.c == 0 && self.partial == 0
    }

    pub fn bytes<T: Element>(&self) -> usize {
        (self.a + self.b + self.c) * size_of::<T>() + self.partial * size_of::<T::Acc>()
    }

    /// Component-wise maximum, for sizing one workspace shared by several plans.
    pub fn max(self, other: Self) -> Self {
        Self {
            a: self.a.max(other.a),
            b: self.b.max(other.b),
            c: self.c.max(other.c),
            partial: self.partial.max(other.partial),
        }
    }
}

/// Caller-owned workspace.
#[derive(Debug, Default)]
pub struct Workspace<T: Element> {
    pub a: Vec<T>,
    pub b: Vec<T>,
    pub c: Vec<T>,
    pub partial: Vec<T::Acc>,
}

impl<T: Element> Workspace<T> {
    pub fn empty() -> Self {
        Self {
            a: Vec::new(),
            b: Vec::new(),
            c: Vec::new(),
            partial: Vec::new(),
        }
    }

    /// Allocates a zeroed workspace. Fails without retrying when memory is short.
    pub fn allocate(size: WorkspaceSize) -> Result<Self> {
        let bytes = size.bytes::<T>();
        let fail = |_| GemmError::WorkspaceAllocation { bytes };
        let mut ws = Self::empty();
        ws.a.try_reserve_exact(size.a).map_err(fail)?;
        ws.b.try_reserve_exact(size.b).map_err(fail)?;
        ws.c.try_reserve_exact(size.c).map_err(fail)?;
        ws.partial.try_reserve_exact(size.partial).map_err(fail)?;
        ws.a.resize(size.a, T::default());
        ws.b.resize(size.b, T::default());
        ws.c.resize(size.c, T::default());
        ws.partial.resize(size.partial, T::Acc::default());
        log::debug!("Allocated workspace: {} bytes", bytes);
        Ok(ws)
    }

    pub fn size(&self) -> WorkspaceSize {
        WorkspaceSize {
            a: self.a.len(),
            b: self.b.len(),
            c: self.c.len(),
            partial: self.partial.len(),
        }
    }

    /// Checks that every buffer is at least as large as `required`.
    pub fn check(&self, required: &WorkspaceSize) -> Result<()> {
        let have = self.size();
        if have.a < required.a
            || have.b < required.b
            || have.c < required.c
            || have.partial < required.partial
        {
            return Err(GemmError::WorkspaceTooSmall {
                required: required.bytes::<T>(),
                provided: have.bytes::<T>(),
            });
        }
        Ok(())
    }
}
