//! Error types for GEMM planning and execution.

use crate::dispatch::tiling_key::TilingKey;
use thiserror::Error;

/// Broad class of a [`GemmError`], used by callers to decide how to react.
///
/// | Kind         | Reaction                                              |
/// |--------------|-------------------------------------------------------|
/// | `Argument`   | caller bug, fix the inputs                            |
/// | `Capability` | try a more general kernel variant                     |
/// | `Resource`   | surfaced immediately, never retried                   |
/// | `Execution`  | the launch is lost, no partial result is defined      |
/// | `Config`     | bad configuration file, environment or tiling key     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    Capability,
    Resource,
    Execution,
    Config,
}

/// Errors that can occur while planning or running a GEMM.
#[derive(Debug, Error)]
pub enum GemmError {
    /// Group list length differs from the declared group count.
    #[error("group list has {actual} entries, expected {expected}")]
    GroupListLength { expected: usize, actual: usize },

    /// Group list decreases at `index`.
    #[error("group list is not monotonic at index {index}: {previous} > {current}")]
    GroupListNotMonotonic {
        index: usize,
        previous: usize,
        current: usize,
    },

    /// Last group list entry differs from the batched extent.
    #[error("group list ends at {actual}, expected total extent {expected}")]
    GroupListTotal { expected: usize, actual: usize },

    /// Operand dimensions disagree with the problem shape.
    #[error("shape mismatch for operand {operand}: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    ShapeMismatch {
        operand: char,
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    /// Operand slice is shorter than its layout requires.
    #[error("buffer for operand {operand} holds {len} elements, layout needs {required}")]
    BufferTooSmall {
        operand: char,
        required: usize,
        len: usize,
    },

    /// Stride or block shape would map two elements to one offset.
    #[error("invalid layout for operand {operand}: {reason}")]
    InvalidLayout { operand: char, reason: String },

    /// Output regions of two groups overlap.
    #[error("output of group {group} overlaps group {other}")]
    OverlappingOutput { group: usize, other: usize },

    /// Descriptor element type does not match the slice element type.
    #[error("element type mismatch: descriptor says {expected}, buffers are {actual}")]
    ElementMismatch { expected: String, actual: String },

    /// The kernel variant cannot handle this shape/layout/padding combination.
    #[error("kernel {kernel} cannot implement this problem: {reason}")]
    Unsupported { kernel: &'static str, reason: String },

    /// No variant is registered under the key.
    #[error("no kernel registered for tiling key {0}")]
    NoKernel(TilingKey),

    /// Tiling key bits do not decode.
    #[error("invalid tiling key 0x{bits:016x}: {reason}")]
    InvalidTilingKey { bits: u64, reason: String },

    /// Caller workspace is smaller than `workspace_size()` reported.
    #[error("workspace too small: {required} bytes required, {provided} provided")]
    WorkspaceTooSmall { required: usize, provided: usize },

    /// Workspace allocation failed.
    #[error("failed to allocate {bytes} bytes of workspace")]
    WorkspaceAllocation { bytes: usize },

    /// A compute unit thread could not be started.
    #[error("failed to spawn compute unit: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// Fault during execution of a unit. The whole launch is void.
    #[error("execution fault on unit {unit}: {message}")]
    ExecutionFault { unit: usize, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl GemmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GemmError::GroupListLength { .. }
            | GemmError::GroupListNotMonotonic { .. }
            | GemmError::GroupListTotal { .. }
            | GemmError::ShapeMismatch { .. }
            | GemmError::BufferTooSmall { .. }
            | GemmError::InvalidLayout { .. }
            | GemmError::OverlappingOutput { .. }
            | GemmError::ElementMismatch { .. } => ErrorKind::Argument,
            GemmError::Unsupported { .. } | GemmError::NoKernel(_) => ErrorKind::Capability,
            GemmError::WorkspaceTooSmall { .. }
            | GemmError::WorkspaceAllocation { .. }
            | GemmError::ThreadSpawn(_) => ErrorKind::Resource,
            GemmError::ExecutionFault { .. } => ErrorKind::Execution,
            GemmError::InvalidTilingKey { .. }
            | GemmError::InvalidConfig(_)
            | GemmError::ConfigParse(_) => ErrorKind::Config,
        }
    }

    /// True when a less specialized kernel may still succeed.
    pub fn is_capability(&self) -> bool {
        self.kind() == ErrorKind::Capability
    }

    pub(crate) fn unsupported(kernel: &'static str, reason: impl Into<String>) -> Self {
        GemmError::Unsupported {
            kernel,
            reason: reason.into(),
        }
    }
}

/// Result type for GEMM operations.
pub type Result<T> = std::result::Result<T, GemmError>;
