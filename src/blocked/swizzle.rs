//! Block iteration scheduler ("swizzle").
//!
//! Maps a linear task index to the output tile it produces. Tasks are grouped
//! into bands of `offset` tile-rows (or tile-columns); inside a band the walk
//! goes across the band first, so a run of consecutive tasks shares one
//! operand tile. Odd bands are walked in reverse (serpentine), keeping the
//! other operand's tile hot across the band boundary.
//!
//! ```text
//!   RowBand, offset = 2, 5×4 tiles          ColumnBand, offset = 2, 4×5 tiles
//!
//!    0  2  4  6                              0  1 14 15 16
//!    1  3  5  7                              2  3 12 13 17
//!   14 12 10  8                              4  5 10 11 18
//!   15 13 11  9                              6  7  8  9 19
//!   16 17 18 19
//! ```
//!
//! The second band of each example is reversed. The last band is shorter
//! when the tile count is not a multiple of `offset`.

use crate::error::{GemmError, Result};
use crate::matrix::shape::{BlockCoord, ProblemShape, TileShape, ceil_div};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SwizzleDirection {
    /// Bands of tile-rows; consecutive tasks share an A tile column band.
    RowBand = 0,
    /// Bands of tile-columns; consecutive tasks share a B tile row band.
    ColumnBand = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SwizzleConfig {
    pub offset: usize,
    pub direction: SwizzleDirection,
}

impl SwizzleConfig {
    pub const fn new(offset: usize, direction: SwizzleDirection) -> Self {
        Self { offset, direction }
    }

    /// Offset 1, row bands.
    pub const fn identity() -> Self {
        Self::new(1, SwizzleDirection::RowBand)
    }

    /// The usual choice: bands of three along the longer output dimension.
    pub fn for_problem(problem: &ProblemShape) -> Self {
        if problem.m > problem.n {
            Self::new(3, SwizzleDirection::RowBand)
        } else {
            Self::new(3, SwizzleDirection::ColumnBand)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.offset == 0 {
            return Err(GemmError::InvalidConfig(
                "swizzle offset must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SwizzleConfig {
    fn default() -> Self {
        Self::identity()
    }
}

/// Scheduler for one problem. Pure: every method is a function of the inputs.
#[derive(Debug, Clone, Copy)]
pub struct BlockSwizzle {
    problem: ProblemShape,
    tile: TileShape,
    loops_m: usize,
    loops_n: usize,
    swizzle: SwizzleConfig,
}

impl BlockSwizzle {
    pub fn new(problem: ProblemShape, tile: TileShape, swizzle: SwizzleConfig) -> Result<Self> {
        swizzle.validate()?;
        if tile.is_degenerate() {
            return Err(GemmError::InvalidConfig(format!("degenerate tile shape {tile}")));
        }
        Ok(Self {
            problem,
            tile,
            loops_m: ceil_div(problem.m, tile.m),
            loops_n: ceil_div(problem.n, tile.n),
            swizzle,
        })
    }

    pub fn problem(&self) -> &ProblemShape {
        &self.problem
    }

    pub fn tile(&self) -> &TileShape {
        &self.tile
    }

    /// Tile counts along M and N.
    pub fn loops(&self) -> (usize, usize) {
        (self.loops_m, self.loops_n)
    }

    /// Number of output tiles.
    pub fn core_loops(&self) -> usize {
        self.loops_m * self.loops_n
    }

    /// Which batch a task index belongs to when tasks of several equal
    /// problems are numbered consecutively.
    pub fn batch_idx(&self, task: usize) -> usize {
        task.checked_div(self.core_loops()).unwrap_or(0)
    }

    pub fn block_coord(&self, task: usize) -> BlockCoord {
        if self.core_loops() == 0 {
            return BlockCoord::default();
        }
        let inner = task % self.core_loops();
        let (row, col) = band_walk(inner, self.loops_m, self.loops_n, self.swizzle);
        BlockCoord::new(row, col, 0)
    }

    /// Extent of the tile at `coord`, clipped at the problem edge.
    pub fn actual_block_shape(&self, coord: BlockCoord) -> TileShape {
        TileShape::new(
            clipped(coord.row, self.loops_m, self.problem.m, self.tile.m),
            clipped(coord.col, self.loops_n, self.problem.n, self.tile.n),
            self.problem.k,
        )
    }
}

/// Scheduler that additionally splits K into `split_k` slices; every
/// (tile, slice) pair is one task.
#[derive(Debug, Clone, Copy)]
pub struct SplitkBlockSwizzle {
    inner: BlockSwizzle,
    loops_k: usize,
    split_k: usize,
}

impl SplitkBlockSwizzle {
    /// `split_k` is clamped to `1..=ceil(K / tile.k)`.
    pub fn new(
        problem: ProblemShape,
        tile: TileShape,
        swizzle: SwizzleConfig,
        split_k: usize,
    ) -> Result<Self> {
        let inner = BlockSwizzle::new(problem, tile, swizzle)?;
        let loops_k = ceil_div(problem.k, tile.k);
        Ok(Self {
            inner,
            loops_k,
            split_k: split_k.clamp(1, loops_k.max(1)),
        })
    }

    pub fn split_k(&self) -> usize {
        self.split_k
    }

    pub fn tiles(&self) -> usize {
        self.inner.core_loops()
    }

    pub fn core_loops(&self) -> usize {
        self.inner.core_loops() * self.split_k
    }

    pub fn slice_idx(&self, task: usize) -> usize {
        task % self.core_loops() / self.tiles()
    }

    /// First K tile of slice `slice`. The first `loops_k % split_k` slices are one tile longer.
    pub fn k_idx(&self, slice: usize) -> usize {
        let base = self.loops_k / self.split_k;
        let extra = self.loops_k % self.split_k;
        if slice < extra {
            (base + 1) * slice
        } else {
            slice * base + extra
        }
    }

    /// Slice starting at K tile `k_tile`; inverse of [`k_idx`](Self::k_idx).
    pub fn slice_at(&self, k_tile: usize) -> usize {
        let base = self.loops_k / self.split_k;
        let extra = self.loops_k % self.split_k;
        let long = (base + 1) * extra;
        if k_tile < long {
            k_tile / (base + 1)
        } else {
            extra + (k_tile - long) / base.max(1)
        }
    }

    pub fn block_coord(&self, task: usize) -> BlockCoord {
        let slice = self.slice_idx(task);
        let coord = self.inner.block_coord(task % self.tiles());
        BlockCoord::new(coord.row, coord.col, self.k_idx(slice))
    }

    /// Clipped tile extent; `k` is the length of the slice starting at `coord.k`.
    pub fn actual_block_shape(&self, coord: BlockCoord, slice: usize) -> TileShape {
        let shape = self.inner.actual_block_shape(coord);
        let problem = self.inner.problem();
        let tile_k = self.inner.tile().k;
        let k = if slice + 1 == self.split_k {
            problem.k - coord.k * tile_k
        } else if slice < self.loops_k % self.split_k {
            (self.loops_k / self.split_k + 1) * tile_k
        } else {
            (self.loops_k / self.split_k) * tile_k
        };
        TileShape::new(shape.m, shape.n, k)
    }
}

fn band_walk(inner: usize, loops_m: usize, loops_n: usize, swizzle: SwizzleConfig) -> (usize, usize) {
    let offset = swizzle.offset;
    match swizzle.direction {
        SwizzleDirection::RowBand => {
            let band_count = ceil_div(loops_m, offset);
            let band = inner / (offset * loops_n);
            let in_band = inner % (offset * loops_n);
            let band_rows = if band == band_count - 1 {
                loops_m - offset * band
            } else {
                offset
            };
            let row = band * offset + in_band % band_rows;
            let mut col = in_band / band_rows;
            if band % 2 == 1 {
                col = loops_n - col - 1;
            }
            (row, col)
        }
        SwizzleDirection::ColumnBand => {
            let band_count = ceil_div(loops_n, offset);
            let band = inner / (offset * loops_m);
            let in_band = inner % (offset * loops_m);
            let band_cols = if band == band_count - 1 {
                loops_n - offset * band
            } else {
                offset
            };
            let mut row = in_band / band_cols;
            let col = band * offset + in_band % band_cols;
            if band % 2 == 1 {
                row = loops_m - row - 1;
            }
            (row, col)
        }
    }
}

#[inline]
fn clipped(idx: usize, loops: usize, extent: usize, tile: usize) -> usize {
    if idx + 1 == loops {
        extent - idx * tile
    } else {
        tile
    }
}
