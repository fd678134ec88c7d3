//! Primitive block operations of the pipeline.
//!
//! - `copy_block`: tile copies between global memory, L1 slots, L0 buffers
//!   and the L0C accumulator, converting layouts on the way
//! - `mmad`: the multiply-accumulate block over L0 fragments (portable, with
//!   an AVX2 path for f64)

pub mod copy_block;
pub mod mmad;
