//! Layout descriptors: logical (row, col) to linear offset.
//!
//! ```text
//! RowMajor            ColumnMajor          Zn (blocked A)           Nz (blocked B)
//! 0 1 2 3             0 3 6 9              column bands of          row bands of
//! 4 5 6 7             1 4 7 10             row-major fractals       column-major fractals
//! 8 9 10 11           2 5 8 11             ┌──┐┌──┐                 ┌────────┐
//!                                          │z │││  │                 │ n n n n │
//!                                          └──┘└──┘                 └────────┘
//! ```
//!
//! The two tile-blocked padding layouts store each `block_rows × block_cols`
//! tile densely, tiles laid out row-major (`PaddingRowMajor`) or column-major
//! (`PaddingColumnMajor`). Blocked layouts round the matrix up to whole
//! fractals/tiles; the rounded positions are padding and hold zero after a
//! reformat.

use crate::error::{GemmError, Result};
use crate::matrix::shape::{ceil_div, round_up};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest stride the copy engine can address directly.
pub const MAX_ADDRESSABLE_STRIDE: usize = 65535;

/// Alignment beyond this (in bytes, log2) is not distinguished.
pub const MAX_ALIGNMENT_LOG2: u32 = 9;

/// Fractal height used by the blocked layouts.
pub const FRACTAL_ROWS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum LayoutTag {
    RowMajor = 0,
    ColumnMajor = 1,
    Zn = 2,
    Nz = 3,
    PaddingRowMajor = 4,
    PaddingColumnMajor = 5,
}

impl LayoutTag {
    pub const ALL: [LayoutTag; 6] = [
        LayoutTag::RowMajor,
        LayoutTag::ColumnMajor,
        LayoutTag::Zn,
        LayoutTag::Nz,
        LayoutTag::PaddingRowMajor,
        LayoutTag::PaddingColumnMajor,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Plain strided layout (no fractal or tile blocking).
    pub fn is_nd(self) -> bool {
        matches!(self, LayoutTag::RowMajor | LayoutTag::ColumnMajor)
    }
}

impl fmt::Display for LayoutTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayoutTag::RowMajor => "row",
            LayoutTag::ColumnMajor => "col",
            LayoutTag::Zn => "zn",
            LayoutTag::Nz => "nz",
            LayoutTag::PaddingRowMajor => "padrow",
            LayoutTag::PaddingColumnMajor => "padcol",
        };
        f.write_str(name)
    }
}

impl FromStr for LayoutTag {
    type Err = GemmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "row" | "rowmajor" | "r" | "n" => Ok(LayoutTag::RowMajor),
            "col" | "column" | "columnmajor" | "c" | "t" => Ok(LayoutTag::ColumnMajor),
            "zn" => Ok(LayoutTag::Zn),
            "nz" => Ok(LayoutTag::Nz),
            "padrow" => Ok(LayoutTag::PaddingRowMajor),
            "padcol" => Ok(LayoutTag::PaddingColumnMajor),
            other => Err(GemmError::InvalidConfig(format!("unknown layout `{other}`"))),
        }
    }
}

/// Layout of one 2-D operand.
///
/// `stride` is the leading dimension for `RowMajor`/`ColumnMajor`. For the
/// blocked tags it is derived: rounded rows for `Zn`, rounded columns for `Nz`,
/// and the number of tiles along the major direction for the padding layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layout {
    pub tag: LayoutTag,
    pub rows: usize,
    pub cols: usize,
    pub stride: usize,
    pub block_rows: usize,
    pub block_cols: usize,
}

impl Layout {
    pub fn row_major(rows: usize, cols: usize) -> Self {
        Self::row_major_with_stride(rows, cols, cols)
    }

    pub fn row_major_with_stride(rows: usize, cols: usize, stride: usize) -> Self {
        debug_assert!(stride >= cols);
        Self {
            tag: LayoutTag::RowMajor,
            rows,
            cols,
            stride,
            block_rows: 1,
            block_cols: 1,
        }
    }

    pub fn column_major(rows: usize, cols: usize) -> Self {
        Self::column_major_with_stride(rows, cols, rows)
    }

    pub fn column_major_with_stride(rows: usize, cols: usize, stride: usize) -> Self {
        debug_assert!(stride >= rows);
        Self {
            tag: LayoutTag::ColumnMajor,
            rows,
            cols,
            stride,
            block_rows: 1,
            block_cols: 1,
        }
    }

    /// Dense layout for an ND tag.
    pub fn nd(tag: LayoutTag, rows: usize, cols: usize) -> Self {
        match tag {
            LayoutTag::ColumnMajor => Self::column_major(rows, cols),
            _ => Self::row_major(rows, cols),
        }
    }

    /// Column bands of `fractal_rows × fractal_cols` row-major fractals.
    pub fn zn(rows: usize, cols: usize, fractal_rows: usize, fractal_cols: usize) -> Self {
        Self {
            tag: LayoutTag::Zn,
            rows,
            cols,
            stride: round_up(rows, fractal_rows),
            block_rows: fractal_rows,
            block_cols: fractal_cols,
        }
    }

    /// Row bands of `fractal_rows × fractal_cols` column-major fractals.
    pub fn nz(rows: usize, cols: usize, fractal_rows: usize, fractal_cols: usize) -> Self {
        Self {
            tag: LayoutTag::Nz,
            rows,
            cols,
            stride: round_up(cols, fractal_cols),
            block_rows: fractal_rows,
            block_cols: fractal_cols,
        }
    }

    pub fn padding_row_major(rows: usize, cols: usize, block_rows: usize, block_cols: usize) -> Self {
        Self {
            tag: LayoutTag::PaddingRowMajor,
            rows,
            cols,
            stride: ceil_div(cols, block_cols),
            block_rows,
            block_cols,
        }
    }

    pub fn padding_column_major(
        rows: usize,
        cols: usize,
        block_rows: usize,
        block_cols: usize,
    ) -> Self {
        Self {
            tag: LayoutTag::PaddingColumnMajor,
            rows,
            cols,
            stride: ceil_div(rows, block_rows),
            block_rows,
            block_cols,
        }
    }

    /// Linear offset of logical element (r, c).
    #[inline]
    pub fn offset(&self, r: usize, c: usize) -> usize {
        let (br, bc) = (self.block_rows, self.block_cols);
        match self.tag {
            LayoutTag::RowMajor => r * self.stride + c,
            LayoutTag::ColumnMajor => c * self.stride + r,
            LayoutTag::Zn => (c / bc) * self.stride * bc + r * bc + c % bc,
            LayoutTag::Nz => (r / br) * self.stride * br + c * br + r % br,
            LayoutTag::PaddingRowMajor => {
                let tile = (r / br) * self.stride + c / bc;
                tile * br * bc + (r % br) * bc + c % bc
            }
            LayoutTag::PaddingColumnMajor => {
                let tile = (c / bc) * self.stride + r / br;
                tile * br * bc + (c % bc) * br + r % br
            }
        }
    }

    /// Logical element stored at `offset`, or `None` for a padding or gap position.
    pub fn coord_at(&self, offset: usize) -> Option<(usize, usize)> {
        let (br, bc) = (self.block_rows, self.block_cols);
        if self.stride == 0 || br == 0 || bc == 0 {
            return None;
        }
        let (r, c) = match self.tag {
            LayoutTag::RowMajor => (offset / self.stride, offset % self.stride),
            LayoutTag::ColumnMajor => (offset % self.stride, offset / self.stride),
            LayoutTag::Zn => {
                let band = self.stride * bc;
                let rem = offset % band;
                (rem / bc, (offset / band) * bc + rem % bc)
            }
            LayoutTag::Nz => {
                let band = self.stride * br;
                let rem = offset % band;
                ((offset / band) * br + rem % br, rem / br)
            }
            LayoutTag::PaddingRowMajor => {
                let tile = offset / (br * bc);
                let rem = offset % (br * bc);
                let (tr, tc) = (tile / self.stride, tile % self.stride);
                (tr * br + rem / bc, tc * bc + rem % bc)
            }
            LayoutTag::PaddingColumnMajor => {
                let tile = offset / (br * bc);
                let rem = offset % (br * bc);
                let (tc, tr) = (tile / self.stride, tile % self.stride);
                (tr * br + rem % br, tc * bc + rem / br)
            }
        };
        (r < self.rows && c < self.cols && offset < self.capacity()).then_some((r, c))
    }

    /// Elements the backing buffer must hold.
    pub fn capacity(&self) -> usize {
        if self.rows == 0 || self.cols == 0 {
            return 0;
        }
        match self.tag {
            LayoutTag::RowMajor | LayoutTag::ColumnMajor => {
                self.offset(self.rows - 1, self.cols - 1) + 1
            }
            LayoutTag::Zn | LayoutTag::Nz => {
                round_up(self.rows, self.block_rows) * round_up(self.cols, self.block_cols)
            }
            LayoutTag::PaddingRowMajor | LayoutTag::PaddingColumnMajor => {
                ceil_div(self.rows, self.block_rows)
                    * ceil_div(self.cols, self.block_cols)
                    * self.block_rows
                    * self.block_cols
            }
        }
    }

    /// Length of one contiguous run of logical elements.
    pub fn inner_extent(&self) -> usize {
        match self.tag {
            LayoutTag::RowMajor => self.cols,
            LayoutTag::ColumnMajor => self.rows,
            LayoutTag::Zn | LayoutTag::PaddingRowMajor => self.block_cols,
            LayoutTag::Nz | LayoutTag::PaddingColumnMajor => self.block_rows,
        }
    }

    /// Number of contiguous runs.
    pub fn outer_extent(&self) -> usize {
        match self.tag {
            LayoutTag::RowMajor => self.rows,
            LayoutTag::ColumnMajor => self.cols,
            _ => ceil_div(self.capacity(), self.inner_extent().max(1)),
        }
    }

    /// Distance between consecutive runs as the copy engine sees it.
    pub fn leading_stride(&self) -> usize {
        if self.tag.is_nd() {
            self.stride
        } else {
            self.inner_extent()
        }
    }

    /// log2 of the byte alignment of the leading stride, capped at [`MAX_ALIGNMENT_LOG2`].
    pub fn stride_alignment_log2(&self, elem_bytes: usize) -> u32 {
        let bytes = self.leading_stride() * elem_bytes;
        if bytes == 0 {
            return MAX_ALIGNMENT_LOG2;
        }
        bytes.trailing_zeros().min(MAX_ALIGNMENT_LOG2)
    }

    /// Checks that distinct elements get distinct offsets.
    ///
    /// ND strides must cover the inner extent; blocked layouts must carry the
    /// stride their constructor derives.
    pub fn validate(&self, operand: char) -> Result<()> {
        let invalid = |reason: String| Err(GemmError::InvalidLayout { operand, reason });
        if self.rows == 0 || self.cols == 0 {
            return Ok(());
        }
        if self.tag.is_nd() {
            let inner = self.inner_extent();
            if self.stride < inner {
                return invalid(format!("{} stride {} below inner extent {}", self.tag, self.stride, inner));
            }
            return Ok(());
        }

        let (br, bc) = (self.block_rows, self.block_cols);
        if br == 0 || bc == 0 {
            return invalid(format!("{} block {}x{} is empty", self.tag, br, bc));
        }
        let expected = match self.tag {
            LayoutTag::Zn => round_up(self.rows, br),
            LayoutTag::Nz => round_up(self.cols, bc),
            LayoutTag::PaddingRowMajor => ceil_div(self.cols, bc),
            _ => ceil_div(self.rows, br),
        };
        if self.stride != expected {
            return invalid(format!("{} stride {} differs from {}", self.tag, self.stride, expected));
        }
        Ok(())
    }

    pub fn is_addressable(&self) -> bool {
        self.leading_stride() <= MAX_ADDRESSABLE_STRIDE
    }

    /// Same storage seen as the transposed matrix.
    pub fn transposed(&self) -> Self {
        let tag = match self.tag {
            LayoutTag::RowMajor => LayoutTag::ColumnMajor,
            LayoutTag::ColumnMajor => LayoutTag::RowMajor,
            LayoutTag::Zn => LayoutTag::Nz,
            LayoutTag::Nz => LayoutTag::Zn,
            LayoutTag::PaddingRowMajor => LayoutTag::PaddingColumnMajor,
            LayoutTag::PaddingColumnMajor => LayoutTag::PaddingRowMajor,
        };
        Self {
            tag,
            rows: self.cols,
            cols: self.rows,
            stride: self.stride,
            block_rows: self.block_cols,
            block_cols: self.block_rows,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}x{}, stride {}]", self.tag, self.rows, self.cols, self.stride)
    }
}
