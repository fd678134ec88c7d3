//! Tiled GEMM engine with a multi-stage copy/compute pipeline.
//!
//! The problem is cut into output tiles, the tiles are dealt to a fixed pool
//! of compute units, and every unit streams the K sub-tiles of its tiles
//! through per-unit L1 slots and L0 buffers while the next sub-tile is
//! already being loaded.
//!
//! ## Usage
//!
//! ```
//! use tilegemm::{GemmConfig, GemmDescriptor, GemmPlan, ElementType, ProblemShape, Workspace};
//!
//! let (m, n, k) = (64, 48, 32);
//! let a = vec![1.0f32; m * k];
//! let b = vec![1.0f32; k * n];
//! let mut c = vec![0.0f32; m * n];
//!
//! let desc = GemmDescriptor::row_major(ElementType::F32, ProblemShape::new(m, n, k));
//! let plan = GemmPlan::<f32>::new(&desc, &GemmConfig::default()).unwrap();
//! let mut workspace = Workspace::allocate(plan.workspace_size()).unwrap();
//! plan.run(&a, &b, &mut c, &mut workspace).unwrap();
//!
//! assert!(c.iter().all(|&x| x == 32.0));
//! ```
//!
//! For row-major operands and the global configuration, [`multiply`] does
//! all of the above in one call.
//!
//! ## What's inside
//!
//! - Block swizzle scheduling, with a split-K variant
//! - Loader/compute pipeline over bounded slot channels (double buffering by default)
//! - Cost-model driven padding of badly strided operands
//! - Grouped and batched problems with carry-over unit rotation
//! - Tiling-key dispatch to Common, Small, PaddingCommon and SplitK variants

pub mod blocked;
pub mod config;
pub mod dispatch;
pub mod element;
pub mod error;
pub mod kernels;
pub mod matrix;
pub mod padding;
pub mod threaded;

pub use config::GemmConfig;
pub use dispatch::tiling_key::{KernelSerial, TilingKey};
pub use dispatch::{GemmDescriptor, GemmPlan};
pub use element::{Element, ElementType};
pub use error::{ErrorKind, GemmError, Result};
pub use matrix::layout::{Layout, LayoutTag};
pub use matrix::naive_ikj::matmul_naive_ikj;
pub use matrix::shape::{ProblemShape, TileShape};
pub use padding::workspace::{Workspace, WorkspaceSize};
pub use threaded::grouped::{BatchedMatmul, GroupList, GroupedMatmul};

/// Computes `C = A × B` for `desc` with the global configuration.
///
/// Plans the problem, allocates the workspace it needs and runs it.
pub fn gemm<T: Element>(desc: &GemmDescriptor, a: &[T], b: &[T], c: &mut [T]) -> Result<()> {
    let config = GemmConfig::get();
    let plan = GemmPlan::<T>::new(desc, &config)?;
    let mut workspace = Workspace::allocate(plan.workspace_size())?;
    plan.run(a, b, c, &mut workspace)
}

/// Matrix multiply: C = A * B
///
/// Matrices are row-major: A is m×k, B is k×n, C is m×n.
pub fn multiply<T: Element>(a: &[T], b: &[T], c: &mut [T], m: usize, n: usize, k: usize) -> Result<()> {
    let desc = GemmDescriptor::row_major(T::TYPE, ProblemShape::new(m, n, k));
    gemm(&desc, a, b, c)
}
