//! L1 buffer slots cycled between the loader and the compute task.
//!
//! Two bounded channels of capacity `STAGES` replace the hardware event flag
//! pair of each slot:
//!
//! ```text
//!            free (safe to refill)
//!   ┌────────────────────────────────────┐
//!   ▼                                    │
//! loader ──── ready (data ready) ────▶ compute
//! ```
//!
//! All `STAGES` slots start in the free channel. A slot is owned by exactly
//! one side at a time, so no locking is involved.

use crate::blocked::block_mmad::BlockTask;
use crate::error::{GemmError, Result};
use crossbeam_channel::{Receiver, Sender, bounded};

/// Consumer-side pipeline state of one compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Waiting for the first sub-tile of the first block.
    PrefetchFirst,
    /// Computing sub-tile i while the loader fills sub-tile i+1.
    ComputeAndPrefetchNext,
    /// The last load has been issued; only compute remains.
    Drain,
}

pub(crate) struct Slot<T> {
    pub index: usize,
    pub a: Vec<T>,
    pub b: Vec<T>,
}

/// A filled slot plus what it holds.
pub(crate) struct Loaded<T> {
    pub slot: Slot<T>,
    pub task: BlockTask,
    /// Position of this sub-tile in the task's (possibly rotated) K order.
    pub step: usize,
    pub k_tiles: usize,
    pub k_len: usize,
    /// No further loads follow on this unit.
    pub last_load: bool,
}

pub(crate) struct LoaderEnd<T> {
    pub free: Receiver<Slot<T>>,
    pub ready: Sender<Loaded<T>>,
}

pub(crate) struct ComputeEnd<T> {
    pub ready: Receiver<Loaded<T>>,
    pub free: Sender<Slot<T>>,
}

/// Allocates `stages` slots and returns both channel ends.
pub(crate) fn slot_ring<T: Copy + Default>(
    stages: usize,
    a_capacity: usize,
    b_capacity: usize,
) -> Result<(LoaderEnd<T>, ComputeEnd<T>)> {
    let (free_tx, free_rx) = bounded(stages);
    let (ready_tx, ready_rx) = bounded(stages);
    for index in 0..stages {
        let slot = Slot {
            index,
            a: vec![T::default(); a_capacity],
            b: vec![T::default(); b_capacity],
        };
        free_tx.send(slot).map_err(|_| {
            GemmError::InvalidConfig(format!("slot channel rejected slot {index}"))
        })?;
    }
    Ok((
        LoaderEnd {
            free: free_rx,
            ready: ready_tx,
        },
        ComputeEnd {
            ready: ready_rx,
            free: free_tx,
        },
    ))
}
