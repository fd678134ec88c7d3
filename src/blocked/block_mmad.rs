//! Multi-stage block compute pipeline.
//!
//! Each compute unit runs two tasks connected by the slot channels of
//! [`slots`](crate::blocked::slots):
//!
//! - the **loader** walks the unit's blocks and their K sub-tiles, waits for a
//!   free slot and fills it from global memory (A as `Zn`, B as `Nz`);
//! - the **compute** side takes ready slots, moves `k0`-wide fragments into the
//!   two alternating L0A/L0B buffers, accumulates into L0C, and hands the slot
//!   back.
//!
//! With `STAGES = 2` the load of sub-tile i+1 overlaps the compute of
//! sub-tile i, including across block boundaries: the first sub-tile of the
//! next block is loaded while the last one of the current block is consumed.
//!
//! ```text
//! loader   | L0 | L1 | L2 |    | L3 |    | L4 | ...
//! compute  |    | C0 | C1 | C2 |    | C3 |    | C4
//!               ^ slot 0 ready   ^ slot 0 free again
//! ```

use crate::blocked::slots::{ComputeEnd, Loaded, LoaderEnd, PipelineState, slot_ring};
use crate::element::Element;
use crate::error::{GemmError, Result};
use crate::kernels::copy_block;
use crate::kernels::mmad::mmad;
use crate::matrix::MatrixRef;
use crate::matrix::layout::{FRACTAL_ROWS, Layout};
use crate::matrix::shape::{BlockCoord, TileShape, ceil_div};
use crate::threaded::launch::panic_message;
use std::thread;

/// One output tile (or split-K slice of a tile) to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTask {
    /// Index into the operand sets passed to [`BlockMmad::run_unit`].
    pub operand: usize,
    pub coord: BlockCoord,
    /// Element offsets of the tile inside its operands.
    pub row0: usize,
    pub col0: usize,
    pub k0: usize,
    /// Actual (clipped) extent.
    pub shape: TileShape,
}

impl BlockTask {
    pub fn new(operand: usize, coord: BlockCoord, shape: TileShape, l1_tile: &TileShape) -> Self {
        Self {
            operand,
            coord,
            row0: coord.row * l1_tile.m,
            col0: coord.col * l1_tile.n,
            k0: coord.k * l1_tile.k,
            shape,
        }
    }
}

/// A and B of one problem (a group or batch entry when there are several).
#[derive(Debug, Clone, Copy)]
pub struct OperandSet<'a, T> {
    pub a: MatrixRef<'a, T>,
    pub b: MatrixRef<'a, T>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitStats {
    pub tiles: usize,
    pub k_steps: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMmad {
    l1: TileShape,
    l0_k: usize,
    stages: usize,
    shuffle_k: bool,
}

impl BlockMmad {
    /// The L0 tile must share m and n with the L1 tile and satisfy `1 <= k0 <= k1`.
    pub fn new(l1: TileShape, l0: TileShape, stages: usize, shuffle_k: bool) -> Result<Self> {
        if l1.is_degenerate() || l0.is_degenerate() {
            return Err(GemmError::InvalidConfig(format!(
                "degenerate tile shapes L1 {l1} / L0 {l0}"
            )));
        }
        if l0.m != l1.m || l0.n != l1.n || l0.k > l1.k {
            return Err(GemmError::InvalidConfig(format!(
                "L0 tile {l0} does not fit the L1 tile {l1}"
            )));
        }
        if stages == 0 {
            return Err(GemmError::InvalidConfig("pipeline needs at least one stage".to_string()));
        }
        Ok(Self {
            l1,
            l0_k: l0.k,
            stages,
            shuffle_k,
        })
    }

    pub fn l1_tile(&self) -> &TileShape {
        &self.l1
    }

    pub fn stages(&self) -> usize {
        self.stages
    }

    /// L1 layout of an A sub-tile.
    pub fn l1_layout_a<T: Element>(&self) -> Layout {
        Layout::zn(self.l1.m, self.l1.k, FRACTAL_ROWS, T::c0())
    }

    /// L1 layout of a B sub-tile.
    pub fn l1_layout_b<T: Element>(&self) -> Layout {
        Layout::nz(self.l1.k, self.l1.n, T::c0(), FRACTAL_ROWS)
    }

    /// First K sub-tile visited by `unit` for a block of `k_tiles` sub-tiles.
    pub fn k_start(&self, unit: usize, k_tiles: usize) -> usize {
        if self.shuffle_k && k_tiles > 0 {
            unit % k_tiles
        } else {
            0
        }
    }

    /// Runs every task of one compute unit, calling `emit` with the finished
    /// `shape.m × shape.n` row-major accumulator of each task.
    pub fn run_unit<T, I, F>(
        &self,
        unit: usize,
        tasks: I,
        operands: &[OperandSet<'_, T>],
        mut emit: F,
    ) -> Result<UnitStats>
    where
        T: Element,
        I: Iterator<Item = BlockTask> + Send,
        F: FnMut(&BlockTask, &[T::Acc]),
    {
        let a_layout = self.l1_layout_a::<T>();
        let b_layout = self.l1_layout_b::<T>();
        let (loader_end, compute_end) =
            slot_ring::<T>(self.stages, a_layout.capacity(), b_layout.capacity())?;

        thread::scope(|scope| {
            let loader = thread::Builder::new()
                .name(format!("loader-{unit}"))
                .spawn_scoped(scope, move || {
                    self.load(unit, tasks, operands, loader_end, a_layout, b_layout)
                })?;
            let stats = self.compute(unit, compute_end, a_layout, b_layout, &mut emit);
            match loader.join() {
                Ok(()) => Ok(stats),
                Err(payload) => Err(GemmError::ExecutionFault {
                    unit,
                    message: format!("loader: {}", panic_message(payload.as_ref())),
                }),
            }
        })
    }

    fn load<T, I>(
        &self,
        unit: usize,
        tasks: I,
        operands: &[OperandSet<'_, T>],
        end: LoaderEnd<T>,
        a_layout: Layout,
        b_layout: Layout,
    ) where
        T: Element,
        I: Iterator<Item = BlockTask>,
    {
        let mut tasks = tasks.peekable();
        while let Some(task) = tasks.next() {
            let k_tiles = ceil_div(task.shape.k, self.l1.k);
            let start = self.k_start(unit, k_tiles);
            let last_task = tasks.peek().is_none();
            let ops = &operands[task.operand];

            for step in 0..k_tiles {
                let k_off = ((start + step) % k_tiles) * self.l1.k;
                let k_len = (task.shape.k - k_off).min(self.l1.k);

                // Blocks until the compute side releases a slot.
                let Ok(mut slot) = end.free.recv() else {
                    return;
                };
                let a_view = ops.a.sub_view(task.row0, task.k0 + k_off, task.shape.m, k_len);
                let b_view = ops.b.sub_view(task.k0 + k_off, task.col0, k_len, task.shape.n);
                copy_block::gm_to_l1(&a_view, &mut slot.a, &a_layout);
                copy_block::gm_to_l1(&b_view, &mut slot.b, &b_layout);

                let loaded = Loaded {
                    slot,
                    task,
                    step,
                    k_tiles,
                    k_len,
                    last_load: last_task && step + 1 == k_tiles,
                };
                if end.ready.send(loaded).is_err() {
                    return;
                }
            }
        }
    }

    fn compute<T, F>(
        &self,
        unit: usize,
        end: ComputeEnd<T>,
        a_layout: Layout,
        b_layout: Layout,
        emit: &mut F,
    ) -> UnitStats
    where
        T: Element,
        F: FnMut(&BlockTask, &[T::Acc]),
    {
        let zero = T::Acc::default();
        let (m1, n1, k0) = (self.l1.m, self.l1.n, self.l0_k);
        let mut l0a = [vec![zero; m1 * k0], vec![zero; m1 * k0]];
        let mut l0b = [vec![zero; k0 * n1], vec![zero; k0 * n1]];
        let mut l0c = vec![zero; m1 * n1];
        let mut ping = 0;

        let mut state = PipelineState::PrefetchFirst;
        let mut stats = UnitStats::default();
        log::trace!("Unit {} pipeline: {:?}", unit, state);

        for loaded in end.ready.iter() {
            let Loaded {
                slot,
                task,
                step,
                k_tiles,
                k_len,
                last_load,
            } = loaded;

            let next = if last_load {
                PipelineState::Drain
            } else {
                PipelineState::ComputeAndPrefetchNext
            };
            if next != state {
                log::trace!("Unit {} pipeline: {:?} -> {:?}", unit, state, next);
                state = next;
            }

            let (m, n) = (task.shape.m, task.shape.n);
            if step == 0 {
                l0c[..m * n].fill(zero);
            }

            let mut kk = 0;
            while kk < k_len {
                let len = k0.min(k_len - kk);
                copy_block::l1_to_l0a::<T>(&slot.a, &a_layout, m, kk, len, &mut l0a[ping]);
                copy_block::l1_to_l0b::<T>(&slot.b, &b_layout, kk, len, n, &mut l0b[ping]);
                mmad(&mut l0c, &l0a[ping], &l0b[ping], m, n, len);
                ping ^= 1;
                kk += len;
            }
            stats.k_steps += 1;

            let slot_index = slot.index;
            if end.free.send(slot).is_err() {
                log::trace!("Unit {} slot {} not returned, loader gone", unit, slot_index);
            }

            if step + 1 == k_tiles {
                emit(&task, &l0c[..m * n]);
                stats.tiles += 1;
            }
        }

        log::trace!(
            "Unit {} pipeline finished: {} tiles, {} k steps",
            unit,
            stats.tiles,
            stats.k_steps
        );
        stats
    }
}
