//! Problem descriptor and the launch plan built from it.

use crate::config::GemmConfig;
use crate::dispatch::tiling::{TilingParams, do_tiling};
use crate::dispatch::tiling_key::TilingKey;
use crate::dispatch::variants::GemmKernel;
use crate::element::{Element, ElementType};
use crate::error::{GemmError, Result};
use crate::matrix::layout::{Layout, LayoutTag};
use crate::matrix::shape::ProblemShape;
use crate::padding::workspace::{Workspace, WorkspaceSize};
use std::sync::Arc;

/// What the caller wants computed: `C (m×n) = A (m×k) × B (k×n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmDescriptor {
    pub shape: ProblemShape,
    pub element: ElementType,
    pub layout_a: Layout,
    pub layout_b: Layout,
    pub layout_c: Layout,
}

impl GemmDescriptor {
    pub fn new(
        element: ElementType,
        shape: ProblemShape,
        layout_a: Layout,
        layout_b: Layout,
        layout_c: Layout,
    ) -> Self {
        Self {
            shape,
            element,
            layout_a,
            layout_b,
            layout_c,
        }
    }

    /// Dense operands in the given orders.
    pub fn dense(
        element: ElementType,
        shape: ProblemShape,
        a: LayoutTag,
        b: LayoutTag,
        c: LayoutTag,
    ) -> Self {
        let ProblemShape { m, n, k } = shape;
        Self::new(
            element,
            shape,
            Layout::nd(a, m, k),
            Layout::nd(b, k, n),
            Layout::nd(c, m, n),
        )
    }

    pub fn row_major(element: ElementType, shape: ProblemShape) -> Self {
        Self::dense(element, shape, LayoutTag::RowMajor, LayoutTag::RowMajor, LayoutTag::RowMajor)
    }

    /// Checks that every layout has the extent the shape implies and maps
    /// distinct elements to distinct offsets.
    pub fn validate(&self) -> Result<()> {
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
}

/// A kernel variant bound to the tiling parameters of one problem.
pub struct GemmPlan<T: Element> {
    params: TilingParams,
    kernel: Arc<dyn GemmKernel<T>>,
}

impl<T: Element> std::fmt::Debug for GemmPlan<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GemmPlan")
            .field("kernel", &self.kernel.name())
            .field("key", &self.params.key())
            .field("params", &self.params)
            .finish()
    }
}

impl<T: Element> GemmPlan<T> {
    /// Selects a variant for `desc`.
    ///
    /// When the selected variant cannot implement the problem, the plan falls
    /// back to the common pipeline behind `BlockNd` padding, then to the plain
    /// common pipeline. When every candidate is rejected, the selected
    /// variant's error is returned. Any other error is returned as is.
    pub fn new(desc: &GemmDescriptor, config: &GemmConfig) -> Result<Self> {
        let selected = Self::tiling(desc, config)?;

        let mut candidates = vec![selected.clone()];
        match selected.with_block_padding(&config.padding_policy()) {
            Ok(params) => candidates.push(params),
            Err(err) => log::debug!("No BlockNd fallback for {}: {}", selected.key(), err),
        }
        candidates.push(selected.without_padding());

        let mut tried: Vec<TilingKey> = Vec::with_capacity(candidates.len());
        // Report the selected variant's rejection, not a fallback's.
        let mut first_error = None;
        for params in candidates {
            let key = params.key();
            if tried.contains(&key) {
                continue;
            }
            tried.push(key);
            match Self::bind(params) {
                Ok(plan) => {
                    if first_error.is_some() {
                        log::warn!("Falling back to kernel {} ({})", plan.kernel.name(), key);
                    }
                    return Ok(plan);
                }
                Err(err) if err.is_capability() => {
                    log::warn!("Kernel for key {} rejected the problem: {}", key, err);
                    first_error.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(first_error.unwrap_or(GemmError::NoKernel(selected.key())))
    }

    /// Selects exactly the variant the tiling decided on, without fallback.
    pub fn exact(desc: &GemmDescriptor, config: &GemmConfig) -> Result<Self> {
        Self::bind(Self::tiling(desc, config)?)
    }

    fn tiling(desc: &GemmDescriptor, config: &GemmConfig) -> Result<TilingParams> {
        if desc.element != T::TYPE {
            return Err(GemmError::ElementMismatch {
                expected: desc.element.to_string(),
                actual: T::TYPE.to_string(),
            });
        }
        do_tiling(desc, config)
    }

    fn bind(params: TilingParams) -> Result<Self> {
        let key = params.key();
        let kernel = T::registry().get(&key)?;
        kernel.can_implement(&params)?;
        log::debug!("Selected kernel {} for key {}", kernel.name(), key);
        Ok(Self {
            params,
            kernel: Arc::clone(kernel),
        })
    }

    pub fn key(&self) -> TilingKey {
        self.params.key()
    }

    pub fn params(&self) -> &TilingParams {
        &self.params
    }

    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    pub fn workspace_size(&self) -> WorkspaceSize {
        self.kernel.workspace_size(&self.params)
    }

    /// Computes `C = A × B` with the caller-owned `workspace`.
    pub fn run(&self, a: &[T], b: &[T], c: &mut [T], workspace: &mut Workspace<T>) -> Result<()> {
        workspace.check(&self.workspace_size())?;
        log::debug!(
            "Running {} on {} with {} units",
            self.kernel.name(),
            self.params.problem,
            self.params.block_dim
        );
        self.kernel.run(&self.params, a, b, c, workspace)
    }
}
