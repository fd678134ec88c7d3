//! Grouped and batched matmul: many independent problems in one launch.
//!
//! The tasks of all groups are dealt to the compute units as one round-robin
//! sequence. Group `g` starts on unit `start_core[g]`, where the previous
//! group stopped:
//!
//! ```text
//! units = 4, loops = [6, 3, 5]
//!
//! start_core = [0, 2, 1]
//!
//! unit 0: g0 t0, g0 t4, g1 t2, g2 t3
//! unit 1: g0 t1, g0 t5, g2 t0, g2 t4
//! unit 2: g0 t2, g1 t0, g2 t1
//! unit 3: g0 t3, g1 t1, g2 t2
//! ```
//!
//! So no unit gets more than one task above the average, however small the
//! groups are.

use crate::blocked::block_mmad::{BlockMmad, BlockTask, OperandSet};
use crate::blocked::swizzle::{BlockSwizzle, SwizzleConfig};
use crate::config::GemmConfig;
use crate::dispatch::tiling::choose_tiles;
use crate::element::Element;
use crate::error::{GemmError, Result};
use crate::kernels::copy_block::{self, TileDst};
use crate::matrix::layout::Layout;
use crate::matrix::shape::{ProblemShape, TileShape};
use crate::matrix::{MatrixMut, MatrixRef, check_capacity};
use crate::padding::workspace::WorkspaceSize;
use crate::threaded::launch::{SharedOutput, launch_units};
use std::ops::Range;

/// Cumulative group boundaries along one batched dimension.
///
/// Entry `g` is the end of group `g`; group `g` covers
/// `list[g - 1]..list[g]` (with `list[-1] = 0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupList {
    ends: Vec<usize>,
}

impl GroupList {
    /// Validates `list` against the declared group count and total extent.
    pub fn new(list: Vec<usize>, group_count: usize, total: usize) -> Result<Self> {
        if list.len() != group_count {
            return Err(GemmError::GroupListLength {
                expected: group_count,
                actual: list.len(),
            });
        }
        for (index, pair) in list.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(GemmError::GroupListNotMonotonic {
                    index: index + 1,
                    previous: pair[0],
                    current: pair[1],
                });
            }
        }
        let last = list.last().copied().unwrap_or(0);
        if last != total {
            return Err(GemmError::GroupListTotal {
                expected: total,
                actual: last,
            });
        }
        Ok(Self { ends: list })
    }

    pub fn from_sizes(sizes: &[usize]) -> Self {
        let ends = sizes
            .iter()
            .scan(0, |acc, &size| {
                *acc += size;
                Some(*acc)
            })
            .collect();
        Self { ends }
    }

    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    pub fn total(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    pub fn range(&self, group: usize) -> Range<usize> {
        let start = if group == 0 { 0 } else { self.ends[group - 1] };
        start..self.ends[group]
    }

    pub fn sizes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).map(|g| self.range(g).len())
    }
}

/// Static assignment of the tasks of several groups to compute units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedSchedule {
    loops: Vec<usize>,
    start_core: Vec<usize>,
    units: usize,
}

impl GroupedSchedule {
    pub fn new(loops: Vec<usize>, units: usize) -> Self {
        let units = units.max(1);
        let mut start_core = Vec::with_capacity(loops.len());
        let mut core = 0;
        for &count in &loops {
            start_core.push(core);
            core = (core + count) % units;
        }
        Self {
            loops,
            start_core,
            units,
        }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn groups(&self) -> usize {
        self.loops.len()
    }

    pub fn total_loops(&self) -> usize {
        self.loops.iter().sum()
    }

    /// Unit that runs the first task of `group`.
    pub fn start_core(&self, group: usize) -> usize {
        self.start_core[group]
    }

    /// First task of `group` run by `unit`; tasks then stride by the unit count.
    pub fn start_loop(&self, unit: usize, group: usize) -> usize {
        (unit + self.units - self.start_core[group]) % self.units
    }

    /// `(group, task)` pairs run by `unit`, in execution order.
    pub fn unit_tasks(&self, unit: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.loops.iter().enumerate().flat_map(move |(group, &loops)| {
            (self.start_loop(unit, group)..loops)
                .step_by(self.units)
                .map(move |task| (group, task))
        })
    }

    /// Number of tasks run by `unit`.
    pub fn assigned(&self, unit: usize) -> usize {
        self.loops
            .iter()
            .enumerate()
            .map(|(group, &loops)| {
                let start = self.start_loop(unit, group);
                if start < loops {
                    (loops - start).div_ceil(self.units)
                } else {
                    0
                }
            })
            .sum()
    }
}

/// One problem of a grouped matmul, located inside the shared A/B/C buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupDesc {
    pub shape: ProblemShape,
    pub layout_a: Layout,
    pub layout_b: Layout,
    pub layout_c: Layout,
    /// Element offsets of the group's operands inside the shared buffers.
    pub offset_a: usize,
    pub offset_b: usize,
    pub offset_c: usize,
}

impl GroupDesc {
    fn check_shapes(&self) -> Result<()> {
        let ProblemShape { m, n, k } = self.shape;
        for (operand, layout, rows, cols) in [
            ('A', &self.layout_a, m, k),
            ('B', &self.layout_b, k, n),
            ('C', &self.layout_c, m, n),
        ] {
            if layout.rows != rows || layout.cols != cols {
                return Err(GemmError::ShapeMismatch {
                    operand,
                    expected_rows: rows,
                    expected_cols: cols,
                    rows: layout.rows,
                    cols: layout.cols,
                });
            }
            layout.validate(operand)?;
        }
        Ok(())
    }

    fn c_span(&self) -> Range<usize> {
        self.offset_c..self.offset_c + self.layout_c.capacity()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedMatmul {
    groups: Vec<GroupDesc>,
}

impl GroupedMatmul {
    pub fn new(groups: Vec<GroupDesc>) -> Self {
        Self { groups }
    }

    /// Dense row-major groups packed back to back in each buffer.
    pub fn from_shapes(shapes: &[ProblemShape]) -> Self {
        let (mut offset_a, mut offset_b, mut offset_c) = (0, 0, 0);
        let groups = shapes
            .iter()
            .map(|&shape| {
                let ProblemShape { m, n, k } = shape;
                let desc = GroupDesc {
                    shape,
                    layout_a: Layout::row_major(m, k),
                    layout_b: Layout::row_major(k, n),
                    layout_c: Layout::row_major(m, n),
                    offset_a,
                    offset_b,
                    offset_c,
                };
                offset_a += m * k;
                offset_b += k * n;
                offset_c += m * n;
                desc
            })
            .collect();
        Self { groups }
    }

    /// `groups` copies of one problem, each operand in its given layout and
    /// packed right after the previous group's.
    pub fn uniform(
        groups: usize,
        shape: ProblemShape,
        layout_a: Layout,
        layout_b: Layout,
        layout_c: Layout,
    ) -> Self {
        let groups = (0..groups)
            .map(|g| GroupDesc {
                shape,
                layout_a,
                layout_b,
                layout_c,
                offset_a: g * layout_a.capacity(),
                offset_b: g * layout_b.capacity(),
                offset_c: g * layout_c.capacity(),
            })
            .collect();
        Self { groups }
    }

    /// Groups split along M: A (`total_m × k`) and C (`total_m × n`) are
    /// shared row-major matrices, every group has its own `k × n` B.
    pub fn slice_m(group_list: &GroupList, n: usize, k: usize) -> Self {
        let groups = (0..group_list.len())
            .map(|g| {
                let rows = group_list.range(g);
                let m = rows.len();
                GroupDesc {
                    shape: ProblemShape::new(m, n, k),
                    layout_a: Layout::row_major(m, k),
                    layout_b: Layout::row_major(k, n),
                    layout_c: Layout::row_major(m, n),
                    offset_a: rows.start * k,
                    offset_b: g * k * n,
                    offset_c: rows.start * n,
                }
            })
            .collect();
        Self { groups }
    }

    /// Groups split along K: A (`m × total_k`) and B (`total_k × n`) are
    /// shared row-major matrices, every group writes its own `m × n` C.
    pub fn slice_k(group_list: &GroupList, m: usize, n: usize) -> Self {
        let total_k = group_list.total();
        let groups = (0..group_list.len())
            .map(|g| {
                let ks = group_list.range(g);
                let k = ks.len();
                GroupDesc {
                    shape: ProblemShape::new(m, n, k),
                    layout_a: Layout::row_major_with_stride(m, k, total_k.max(1)),
                    layout_b: Layout::row_major(k, n),
                    layout_c: Layout::row_major(m, n),
                    offset_a: ks.start,
                    offset_b: ks.start * n,
                    offset_c: g * m * n,
                }
            })
            .collect();
        Self { groups }
    }

    pub fn groups(&self) -> &[GroupDesc] {
        &self.groups
    }

    /// Checks group shapes and layouts, A/B stride limits and that no two
    /// groups write the same part of C. Nothing is launched.
    pub fn can_implement(&self) -> Result<()> {
        for (g, desc) in self.groups.iter().enumerate() {
            desc.check_shapes()?;
            for (name, layout) in [('A', &desc.layout_a), ('B', &desc.layout_b)] {
                if !layout.is_addressable() {
                    return Err(GemmError::unsupported(
                        "grouped",
                        format!("group {g} operand {name} stride {} is not addressable", layout.stride),
                    ));
                }
            }
        }

        let mut spans: Vec<(Range<usize>, usize)> = self
            .groups
            .iter()
            .enumerate()
            .filter(|(_, desc)| !desc.shape.is_empty())
            .map(|(g, desc)| (desc.c_span(), g))
            .collect();
        spans.sort_by_key(|(span, _)| span.start);
        for pair in spans.windows(2) {
            let ((first, g0), (second, g1)) = (&pair[0], &pair[1]);
            if second.start < first.end {
                return Err(GemmError::OverlappingOutput {
                    group: *g1,
                    other: *g0,
                });
            }
        }
        Ok(())
    }

    pub fn workspace_size(&self) -> WorkspaceSize {
        WorkspaceSize::default()
    }

    pub fn run<T: Element>(&self, a: &[T], b: &[T], c: &mut [T], config: &GemmConfig) -> Result<()> {
        self.can_implement()?;

        let mut operands = Vec::with_capacity(self.groups.len());
        for desc in &self.groups {
            let a_view = group_view(a, desc.offset_a, desc.layout_a, 'A')?;
            let b_view = group_view(b, desc.offset_b, desc.layout_b, 'B')?;
            check_capacity(c.len().saturating_sub(desc.offset_c), &desc.layout_c, 'C')?;
            operands.push(OperandSet { a: a_view, b: b_view });
        }

        for desc in self.groups.iter().filter(|d| d.shape.k == 0 && !d.shape.is_empty()) {
            MatrixMut::new(&mut c[desc.offset_c..], desc.layout_c, 'C')?.fill(T::default());
        }

        let max_shape = self.groups.iter().fold(ProblemShape::default(), |acc, d| {
            ProblemShape::new(acc.m.max(d.shape.m), acc.n.max(d.shape.n), acc.k.max(d.shape.k))
        });
        let (l1, l0) = choose_tiles(&max_shape, T::TYPE, config)?;
        let swizzles = self
            .groups
            .iter()
            .map(|desc| group_swizzle(desc.shape, l1, config))
            .collect::<Result<Vec<_>>>()?;
        let loops = swizzles
            .iter()
            .zip(&self.groups)
            .map(|(sw, desc)| if desc.shape.k == 0 { 0 } else { sw.core_loops() })
            .collect::<Vec<_>>();
        let total: usize = loops.iter().sum();
        if total == 0 {
            return Ok(());
        }

        let units = config.platform.compute_units().min(total);
        let schedule = GroupedSchedule::new(loops, units);
        let mmad = BlockMmad::new(l1, l0, config.pipeline.stages, config.pipeline.shuffle_k)?;
        log::debug!(
            "Grouped matmul: {} groups, {} tasks on {} units, L1 {} L0 {}",
            self.groups.len(),
            total,
            units,
            l1,
            l0
        );

        let groups = &self.groups;
        let out = SharedOutput::new(c);
        launch_units(units, "grouped", |unit| {
            let tasks = schedule.unit_tasks(unit).map(|(g, i)| {
                let swizzle = &swizzles[g];
                let coord = swizzle.block_coord(i);
                BlockTask::new(g, coord, swizzle.actual_block_shape(coord), &l1)
            });
            mmad.run_unit(unit, tasks, &operands, |task, acc| {
                let desc = &groups[task.operand];
                let dst = TileDst {
                    base: desc.offset_c,
                    layout: desc.layout_c,
                    row0: task.row0,
                    col0: task.col0,
                };
                // Tiles of different tasks never overlap, and group C spans were checked disjoint.
                unsafe { copy_block::l0c_to_gm(acc, task.shape.m, task.shape.n, &out, &dst) };
            })?;
            Ok(())
        })
    }
}

/// `batch` equal problems at fixed element strides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchedMatmul {
    pub batch: usize,
    pub shape: ProblemShape,
    pub layout_a: Layout,
    pub layout_b: Layout,
    pub layout_c: Layout,
    pub stride_a: usize,
    pub stride_b: usize,
    pub stride_c: usize,
}

impl BatchedMatmul {
    /// Dense row-major batch entries stored back to back.
    pub fn new(batch: usize, shape: ProblemShape) -> Self {
        let ProblemShape { m, n, k } = shape;
        Self {
            batch,
            shape,
            layout_a: Layout::row_major(m, k),
            layout_b: Layout::row_major(k, n),
            layout_c: Layout::row_major(m, n),
            stride_a: m * k,
            stride_b: k * n,
            stride_c: m * n,
        }
    }

    fn entry(&self, index: usize) -> GroupDesc {
        GroupDesc {
            shape: self.shape,
            layout_a: self.layout_a,
            layout_b: self.layout_b,
            layout_c: self.layout_c,
            offset_a: index * self.stride_a,
            offset_b: index * self.stride_b,
            offset_c: index * self.stride_c,
        }
    }

    pub fn can_implement(&self) -> Result<()> {
        if self.batch == 0 {
            return Ok(());
        }
        self.entry(0).check_shapes()?;
        if self.batch > 1 && !self.shape.is_empty() && self.stride_c < self.layout_c.capacity() {
            return Err(GemmError::OverlappingOutput { group: 1, other: 0 });
        }
        for layout in [&self.layout_a, &self.layout_b] {
            if !layout.is_addressable() {
                return Err(GemmError::unsupported(
                    "batched",
                    format!("stride {} is not addressable", layout.stride),
                ));
            }
        }
        Ok(())
    }

    pub fn workspace_size(&self) -> WorkspaceSize {
        WorkspaceSize::default()
    }

    pub fn run<T: Element>(&self, a: &[T], b: &[T], c: &mut [T], config: &GemmConfig) -> Result<()> {
        self.can_implement()?;
        if self.batch == 0 || self.shape.is_empty() {
            return Ok(());
        }

        let mut operands = Vec::with_capacity(self.batch);
        for index in 0..self.batch {
            let desc = self.entry(index);
            operands.push(OperandSet {
                a: group_view(a, desc.offset_a, desc.layout_a, 'A')?,
                b: group_view(b, desc.offset_b, desc.layout_b, 'B')?,
            });
            check_capacity(c.len().saturating_sub(desc.offset_c), &desc.layout_c, 'C')?;
        }

        if self.shape.k == 0 {
            for index in 0..self.batch {
                let offset = index * self.stride_c;
                MatrixMut::new(&mut c[offset..], self.layout_c, 'C')?.fill(T::default());
            }
            return Ok(());
        }

        let (l1, l0) = choose_tiles(&self.shape, T::TYPE, config)?;
        let swizzle = group_swizzle(self.shape, l1, config)?;
        let total = self.batch * swizzle.core_loops();
        let units = config.platform.compute_units().min(total).max(1);
        let mmad = BlockMmad::new(l1, l0, config.pipeline.stages, config.pipeline.shuffle_k)?;
        log::debug!(
            "Batched matmul: {} x {}, {} tasks on {} units",
            self.batch,
            self.shape,
            total,
            units
        );

        let (layout_c, stride_c) = (self.layout_c, self.stride_c);
        let out = SharedOutput::new(c);
        launch_units(units, "batched", |unit| {
            let tasks = (unit..total).step_by(units).map(|task| {
                let coord = swizzle.block_coord(task);
                BlockTask::new(
                    swizzle.batch_idx(task),
                    coord,
                    swizzle.actual_block_shape(coord),
                    &l1,
                )
            });
            mmad.run_unit(unit, tasks, &operands, |task, acc| {
                let dst = TileDst {
                    base: task.operand * stride_c,
                    layout: layout_c,
                    row0: task.row0,
                    col0: task.col0,
                };
                unsafe { copy_block::l0c_to_gm(acc, task.shape.m, task.shape.n, &out, &dst) };
            })?;
            Ok(())
        })
    }
}

fn group_view<'a, T: Copy>(
    buf: &'a [T],
    offset: usize,
    layout: Layout,
    operand: char,
) -> Result<MatrixRef<'a, T>> {
    let data = buf.get(offset..).ok_or(GemmError::BufferTooSmall {
        operand,
        required: offset + layout.capacity(),
        len: buf.len(),
    })?;
    MatrixRef::new(data, layout, operand)
}

fn group_swizzle(shape: ProblemShape, l1: TileShape, config: &GemmConfig) -> Result<BlockSwizzle> {
    let swizzle = config
        .tiling
        .swizzle
        .unwrap_or_else(|| SwizzleConfig::for_problem(&shape));
    BlockSwizzle::new(shape, l1, swizzle)
}
