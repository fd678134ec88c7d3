//! Pipeline variants selected by the tiling key.
//!
//! | Variant         | Tasks                          | Workspace                 |
//! |-----------------|--------------------------------|---------------------------|
//! | `Common`        | all tiles, grid-stride         | none                      |
//! | `Small`         | one tile per unit              | none                      |
//! | `PaddingCommon` | all tiles, after padding pass  | padded A / B / C          |
//! | `SplitK`        | tiles × K slices, then reduce  | `split × m × n` partials  |

use crate::blocked::block_mmad::{BlockMmad, BlockTask, OperandSet};
use crate::blocked::swizzle::{BlockSwizzle, SplitkBlockSwizzle};
use crate::dispatch::tiling::TilingParams;
use crate::dispatch::tiling_key::KernelSerial;
use crate::element::Element;
use crate::error::{GemmError, Result};
use crate::kernels::copy_block::{self, TileDst};
use crate::matrix::layout::{Layout, MAX_ADDRESSABLE_STRIDE};
use crate::matrix::reformat::Gaps;
use crate::matrix::{MatrixMut, MatrixRef, check_capacity};
use crate::padding::policy::PaddingDecision;
use crate::padding::workspace::{Workspace, WorkspaceSize};
use crate::threaded::launch::{SharedOutput, launch_units};
use crate::threaded::padding_pass::{pad_operand, remove_padding};

/// One registered kernel variant.
pub trait GemmKernel<T: Element>: Send + Sync {
    fn serial(&self) -> KernelSerial;

    fn name(&self) -> &'static str {
        self.serial().name()
    }

    /// Fails with a capability error when the variant cannot run `params`.
    fn can_implement(&self, params: &TilingParams) -> Result<()>;

    fn workspace_size(&self, params: &TilingParams) -> WorkspaceSize;

    /// Computes `C = A × B`. The workspace must be at least
    /// [`workspace_size`](Self::workspace_size).
    fn run(
        &self,
        params: &TilingParams,
        a: &[T],
        b: &[T],
        c: &mut [T],
        workspace: &mut Workspace<T>,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommonMatmul;

#[derive(Debug, Clone, Copy, Default)]
pub struct SmallMatmul;

#[derive(Debug, Clone, Copy, Default)]
pub struct PaddingMatmul;

#[derive(Debug, Clone, Copy, Default)]
pub struct SplitKMatmul;

impl<T: Element> GemmKernel<T> for CommonMatmul {
    fn serial(&self) -> KernelSerial {
        KernelSerial::Common
    }

    fn can_implement(&self, params: &TilingParams) -> Result<()> {
        check_direct("common", params)
    }

    fn workspace_size(&self, _params: &TilingParams) -> WorkspaceSize {
        WorkspaceSize::default()
    }

    fn run(
        &self,
        params: &TilingParams,
        a: &[T],
        b: &[T],
        c: &mut [T],
        _workspace: &mut Workspace<T>,
    ) -> Result<()> {
        let (a, b) = operand_views(params, a, b)?;
        run_tiles(params, "common", a, b, c, params.layout_c, params.block_dim)
    }
}

impl<T: Element> GemmKernel<T> for SmallMatmul {
    fn serial(&self) -> KernelSerial {
        KernelSerial::Small
    }

    fn can_implement(&self, params: &TilingParams) -> Result<()> {
        check_direct("small", params)?;
        if params.tiles() > params.compute_units {
            return Err(GemmError::unsupported(
                "small",
                format!("{} tiles exceed {} compute units", params.tiles(), params.compute_units),
            ));
        }
        Ok(())
    }

    fn workspace_size(&self, _params: &TilingParams) -> WorkspaceSize {
        WorkspaceSize::default()
    }

    fn run(
        &self,
        params: &TilingParams,
        a: &[T],
        b: &[T],
        c: &mut [T],
        _workspace: &mut Workspace<T>,
    ) -> Result<()> {
        let (a, b) = operand_views(params, a, b)?;
        // One unit per tile: nothing to prefetch across blocks.
        run_tiles(params, "small", a, b, c, params.layout_c, params.tiles().max(1))
    }
}

impl<T: Element> GemmKernel<T> for PaddingMatmul {
    fn serial(&self) -> KernelSerial {
        KernelSerial::PaddingCommon
    }

    fn can_implement(&self, params: &TilingParams) -> Result<()> {
        if !params.has_padding() {
            return Err(GemmError::unsupported("padding_common", "no operand needs padding"));
        }
        let (a, b, _) = params.pipeline_layouts();
        check_addressable("padding_common", [('A', &a), ('B', &b)])
    }

    fn workspace_size(&self, params: &TilingParams) -> WorkspaceSize {
        let size = |decision: &PaddingDecision| {
            if decision.needs_pass() {
                decision.layout.capacity()
            } else {
                0
            }
        };
        WorkspaceSize {
            a: size(&params.padding_a),
            b: size(&params.padding_b),
            c: size(&params.padding_c),
            partial: 0,
        }
    }

    fn run(
        &self,
        params: &TilingParams,
        a: &[T],
        b: &[T],
        c: &mut [T],
        workspace: &mut Workspace<T>,
    ) -> Result<()> {
        workspace.check(&GemmKernel::<T>::workspace_size(self, params))?;
        let (a_src, b_src) = operand_views(params, a, b)?;
        check_capacity(c.len(), &params.layout_c, 'C')?;
        if params.problem.is_empty() {
            return Ok(());
        }

        let units = params.vector_units;
        let Workspace {
            a: ws_a,
            b: ws_b,
            c: ws_c,
            ..
        } = workspace;

        let a_view = if params.padding_a.needs_pass() {
            let layout = params.padding_a.layout;
            pad_operand(&a_src, ws_a, &layout, units, Gaps::Zero)?;
            MatrixRef::new(&ws_a[..], layout, 'A')?
        } else {
            a_src
        };
        let b_view = if params.padding_b.needs_pass() {
            let layout = params.padding_b.layout;
            pad_operand(&b_src, ws_b, &layout, units, Gaps::Zero)?;
            MatrixRef::new(&ws_b[..], layout, 'B')?
        } else {
            b_src
        };
        log::debug!(
            "Padding pass done: A {} -> {}, B {} -> {}",
            params.padding_a.tag,
            a_view.layout(),
            params.padding_b.tag,
            b_view.layout()
        );

        if params.padding_c.needs_pass() {
            let layout = params.padding_c.layout;
            let padded = &mut ws_c[..layout.capacity()];
            run_tiles(params, "padding", a_view, b_view, padded, layout, params.block_dim)?;
            let padded = MatrixRef::new(&*padded, layout, 'C')?;
            remove_padding(&padded, c, &params.layout_c, units)
        } else {
            run_tiles(params, "padding", a_view, b_view, c, params.layout_c, params.block_dim)
        }
    }
}

impl<T: Element> GemmKernel<T> for SplitKMatmul {
    fn serial(&self) -> KernelSerial {
        KernelSerial::SplitK
    }

    fn can_implement(&self, params: &TilingParams) -> Result<()> {
        check_direct("split_k", params)
    }

    fn workspace_size(&self, params: &TilingParams) -> WorkspaceSize {
        WorkspaceSize {
            partial: params.split_k.max(1) * params.problem.m * params.problem.n,
            ..WorkspaceSize::default()
        }
    }

    fn run(
        &self,
        params: &TilingParams,
        a: &[T],
        b: &[T],
        c: &mut [T],
        workspace: &mut Workspace<T>,
    ) -> Result<()> {
        workspace.check(&GemmKernel::<T>::workspace_size(self, params))?;
        let (a, b) = operand_views(params, a, b)?;
        let problem = params.problem;
        check_capacity(c.len(), &params.layout_c, 'C')?;
        if problem.is_empty() {
            return Ok(());
        }
        if problem.k == 0 {
            MatrixMut::new(c, params.layout_c, 'C')?.fill(T::default());
            return Ok(());
        }

        let l1 = params.l1_tile;
        let swizzle = SplitkBlockSwizzle::new(problem, l1, params.swizzle, params.split_k)?;
        let mmad = BlockMmad::new(l1, params.l0_tile, params.stages, params.shuffle_k)?;
        let split = swizzle.split_k();
        let (m, n) = (problem.m, problem.n);
        let plane = m * n;
        let partial_layout = Layout::row_major(m, n);
        let core_loops = swizzle.core_loops();
        let units = params.block_dim.clamp(1, core_loops);
        let operands = [OperandSet { a, b }];

        {
            let partial = SharedOutput::new(&mut workspace.partial[..split * plane]);
            launch_units(units, "split_k", |unit| {
                let tasks = (unit..core_loops).step_by(units).map(|task| {
                    let slice = swizzle.slice_idx(task);
                    let coord = swizzle.block_coord(task);
                    BlockTask::new(0, coord, swizzle.actual_block_shape(coord, slice), &l1)
                });
                mmad.run_unit(unit, tasks, &operands, |task, acc| {
                    let dst = TileDst {
                        base: swizzle.slice_at(task.coord.k) * plane,
                        layout: partial_layout,
                        row0: task.row0,
                        col0: task.col0,
                    };
                    // Every (tile, slice) pair owns its own region of the partial buffer.
                    unsafe {
                        copy_block::l0c_to_partial(acc, task.shape.m, task.shape.n, &partial, &dst)
                    };
                })?;
                Ok(())
            })?;
        }

        let partial = &workspace.partial[..split * plane];
        let layout_c = params.layout_c;
        let out = SharedOutput::new(c);
        let vector_units = params.vector_units.clamp(1, m);
        log::debug!("Split-K reduction: {} slices on {} vector units", split, vector_units);
        launch_units(vector_units, "reduce", |unit| {
            for row in (unit..m).step_by(vector_units) {
                for col in 0..n {
                    let idx = row * n + col;
                    let mut acc = partial[idx];
                    for slice in 1..split {
                        acc = acc + partial[slice * plane + idx];
                    }
                    // Rows are dealt to exactly one vector unit.
                    unsafe { out.write(layout_c.offset(row, col), T::from_acc(acc)) };
                }
            }
            Ok(())
        })
    }
}

fn operand_views<'a, T: Element>(
    params: &TilingParams,
    a: &'a [T],
    b: &'a [T],
) -> Result<(MatrixRef<'a, T>, MatrixRef<'a, T>)> {
    Ok((
        MatrixRef::new(a, params.layout_a, 'A')?,
        MatrixRef::new(b, params.layout_b, 'B')?,
    ))
}

fn check_direct(kernel: &'static str, params: &TilingParams) -> Result<()> {
    if params.has_padding() {
        return Err(GemmError::unsupported(kernel, "operands need a padding pass"));
    }
    check_addressable(kernel, [('A', &params.layout_a), ('B', &params.layout_b)])
}

/// Only the loaded operands are stride-bound: C is written element by element.
fn check_addressable(kernel: &'static str, layouts: [(char, &Layout); 2]) -> Result<()> {
    for (operand, layout) in layouts {
        if !layout.is_addressable() {
            return Err(GemmError::unsupported(
                kernel,
                format!(
                    "operand {operand} stride {} exceeds {}",
                    layout.leading_stride(),
                    MAX_ADDRESSABLE_STRIDE
                ),
            ));
        }
    }
    Ok(())
}

/// Streams every output tile of `params` through the pipeline on `units`
/// compute units and writes C (laid out as `c_layout`) into `c`.
fn run_tiles<T: Element>(
    params: &TilingParams,
    label: &str,
    a: MatrixRef<'_, T>,
    b: MatrixRef<'_, T>,
    c: &mut [T],
    c_layout: Layout,
    units: usize,
) -> Result<()> {
    let problem = params.problem;
    check_capacity(c.len(), &c_layout, 'C')?;
    if problem.is_empty() {
        return Ok(());
    }
    if problem.k == 0 {
        MatrixMut::new(c, c_layout, 'C')?.fill(T::default());
        return Ok(());
    }

    let l1 = params.l1_tile;
    let swizzle = BlockSwizzle::new(problem, l1, params.swizzle)?;
    let mmad = BlockMmad::new(l1, params.l0_tile, params.stages, params.shuffle_k)?;
    let core_loops = swizzle.core_loops();
    let units = units.clamp(1, core_loops);
    let operands = [OperandSet { a, b }];
    let out = SharedOutput::new(c);

    launch_units(units, label, |unit| {
        let tasks = (unit..core_loops).step_by(units).map(|task| {
            let coord = swizzle.block_coord(task);
            BlockTask::new(0, coord, swizzle.actual_block_shape(coord), &l1)
        });
        let stats = mmad.run_unit(unit, tasks, &operands, |task, acc| {
            let dst = TileDst {
                base: 0,
                layout: c_layout,
                row0: task.row0,
                col0: task.col0,
            };
            unsafe { copy_block::l0c_to_gm(acc, task.shape.m, task.shape.n, &out, &dst) };
        })?;
        log::trace!("Unit {} ({}): {} tiles, {} k steps", unit, label, stats.tiles, stats.k_steps);
        Ok(())
    })
}
