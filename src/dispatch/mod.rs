//! Kernel dispatch.
//!
//! - `tiling`: tile shapes, swizzle, padding and variant choice per problem
//! - `tiling_key`: the 64-bit key encoding those choices
//! - `variants`: the pipeline variants and their common trait
//! - `registry`: key -> variant map, built once per element type
//! - `plan`: descriptor in, runnable plan out

pub mod plan;
pub mod registry;
pub mod tiling;
pub mod tiling_key;
pub mod variants;

pub use plan::{GemmDescriptor, GemmPlan};
