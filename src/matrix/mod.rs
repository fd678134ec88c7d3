//! Matrix descriptors, views and reference implementations.
//!
//! These provide the shape/layout vocabulary shared by every other module,
//! the naive correctness baseline, and the whole-operand layout conversion
//! used by the padding pass.

pub mod layout;
pub mod naive_ikj;
pub mod reformat;
pub mod shape;

use crate::error::{GemmError, Result};
use layout::Layout;

/// Read-only view of a (sub-)matrix stored under `layout`.
#[derive(Debug, Clone, Copy)]
pub struct MatrixRef<'a, T> {
    data: &'a [T],
    layout: Layout,
    row0: usize,
    col0: usize,
    rows: usize,
    cols: usize,
}

impl<'a, T: Copy> MatrixRef<'a, T> {
    /// View of the whole matrix. `operand` names it in errors.
    pub fn new(data: &'a [T], layout: Layout, operand: char) -> Result<Self> {
        check_capacity(data.len(), &layout, operand)?;
        Ok(Self {
            data,
            layout,
            row0: 0,
            col0: 0,
            rows: layout.rows,
            cols: layout.cols,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn data(&self) -> &'a [T] {
        self.data
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> T {
        debug_assert!(r < self.rows && c < self.cols);
        self.data[self.layout.offset(self.row0 + r, self.col0 + c)]
    }

    /// Contiguous row segment `[c, c + len)` of row `r`, when the layout is row-major.
    #[inline]
    pub fn row_segment(&self, r: usize, c: usize, len: usize) -> Option<&'a [T]> {
        if self.layout.tag != layout::LayoutTag::RowMajor {
            return None;
        }
        let start = self.layout.offset(self.row0 + r, self.col0 + c);
        self.data.get(start..start + len)
    }

    /// Contiguous column segment `[r, r + len)` of column `c`, when the layout is column-major.
    #[inline]
    pub fn col_segment(&self, r: usize, c: usize, len: usize) -> Option<&'a [T]> {
        if self.layout.tag != layout::LayoutTag::ColumnMajor {
            return None;
        }
        let start = self.layout.offset(self.row0 + r, self.col0 + c);
        self.data.get(start..start + len)
    }

    pub fn sub_view(&self, row0: usize, col0: usize, rows: usize, cols: usize) -> Self {
        debug_assert!(row0 + rows <= self.rows && col0 + cols <= self.cols);
        Self {
            data: self.data,
            layout: self.layout,
            row0: self.row0 + row0,
            col0: self.col0 + col0,
            rows,
            cols,
        }
    }
}

/// Mutable view of a whole matrix stored under `layout`.
#[derive(Debug)]
pub struct MatrixMut<'a, T> {
    data: &'a mut [T],
    layout: Layout,
}

impl<'a, T: Copy> MatrixMut<'a, T> {
    pub fn new(data: &'a mut [T], layout: Layout, operand: char) -> Result<Self> {
        check_capacity(data.len(), &layout, operand)?;
        Ok(Self { data, layout })
    }

    pub fn rows(&self) -> usize {
        self.layout.rows
    }

    pub fn cols(&self) -> usize {
        self.layout.cols
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> T {
        self.data[self.layout.offset(r, c)]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, value: T) {
        let idx = self.layout.offset(r, c);
        self.data[idx] = value;
    }

    /// Writes `value` to every logical element, leaving stride gaps untouched.
    pub fn fill(&mut self, value: T) {
        for r in 0..self.layout.rows {
            for c in 0..self.layout.cols {
                self.set(r, c, value);
            }
        }
    }

    pub fn as_ref(&self) -> MatrixRef<'_, T> {
        MatrixRef {
            data: &*self.data,
            layout: self.layout,
            row0: 0,
            col0: 0,
            rows: self.layout.rows,
            cols: self.layout.cols,
        }
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut *self.data
    }
}

pub(crate) fn check_capacity(len: usize, layout: &Layout, operand: char) -> Result<()> {
    let required = layout.capacity();
    if len < required {
        return Err(GemmError::BufferTooSmall {
            operand,
            required,
            len,
        });
    }
    Ok(())
}
