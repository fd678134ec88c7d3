//! Problem, tile and block coordinates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// GEMM problem size: C (m×n) = A (m×k) × B (k×n).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ProblemShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl ProblemShape {
    pub const fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }

    /// True when C has no elements.
    pub fn is_empty(&self) -> bool {
        self.m == 0 || self.n == 0
    }

    pub fn flops(&self) -> f64 {
        2.0 * self.m as f64 * self.n as f64 * self.k as f64
    }
}

impl fmt::Display for ProblemShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.m, self.n, self.k)
    }
}

/// Granularity of one memory level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TileShape {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl TileShape {
    pub const fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }

    pub fn is_degenerate(&self) -> bool {
        self.m == 0 || self.n == 0 || self.k == 0
    }

    /// Number of tiles along each dimension of `problem`.
    pub fn loops(&self, problem: &ProblemShape) -> (usize, usize, usize) {
        (
            ceil_div(problem.m, self.m),
            ceil_div(problem.n, self.n),
            ceil_div(problem.k, self.k),
        )
    }
}

impl fmt::Display for TileShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.m, self.n, self.k)
    }
}

/// Output tile position in tile units. `k` is the first K tile of a split-K slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockCoord {
    pub row: usize,
    pub col: usize,
    pub k: usize,
}

impl BlockCoord {
    pub const fn new(row: usize, col: usize, k: usize) -> Self {
        Self { row, col, k }
    }
}

#[inline]
pub const fn ceil_div(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

#[inline]
pub const fn round_up(a: usize, b: usize) -> usize {
    ceil_div(a, b) * b
}
