//! Block-level scheduling and the block compute pipeline.
//!
//! - `swizzle`: task index -> output tile (plus the split-K variant)
//! - `slots`: L1 buffer slots and their ready/free channels
//! - `block_mmad`: the loader/compute pipeline run by every compute unit

pub mod block_mmad;
pub mod slots;
pub mod swizzle;
