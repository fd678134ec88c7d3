//! Tiling: tile sizes, swizzle, padding and kernel choice for one problem.
//!
//! Everything here is decided once per invocation, on the host side, before
//! any compute unit starts. The result is a [`TilingParams`] whose
//! [`key`](TilingParams::key) selects the kernel variant.

use crate::blocked::swizzle::SwizzleConfig;
use crate::config::GemmConfig;
use crate::dispatch::GemmDescriptor;
use crate::dispatch::tiling_key::{KernelSerial, TilingKey};
use crate::element::ElementType;
use crate::error::{GemmError, Result};
use crate::matrix::layout::{FRACTAL_ROWS, Layout, LayoutTag};
use crate::matrix::shape::{ProblemShape, TileShape, round_up};
use crate::padding::policy::{OperandDesc, OperandRole, PaddingDecision, PaddingPolicy, PaddingTag};

/// Largest automatic L1 tile along M and N.
pub const MAX_TILE_MN: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub struct TilingParams {
    pub problem: ProblemShape,
    pub element: ElementType,
    /// Caller layouts after vector normalization.
    pub layout_a: Layout,
    pub layout_b: Layout,
    pub layout_c: Layout,
    pub padding_a: PaddingDecision,
    pub padding_b: PaddingDecision,
    pub padding_c: PaddingDecision,
    pub l1_tile: TileShape,
    pub l0_tile: TileShape,
    pub swizzle: SwizzleConfig,
    pub kernel: KernelSerial,
    pub split_k: usize,
    /// Compute units actually launched: `min(tasks, compute_units)`, at least 1.
    pub block_dim: usize,
    pub compute_units: usize,
    pub vector_units: usize,
    pub stages: usize,
    pub shuffle_k: bool,
}

impl TilingParams {
    pub fn key(&self) -> TilingKey {
        TilingKey::new(
            self.kernel,
            self.element,
            self.layout_a.tag,
            self.layout_b.tag,
            self.layout_c.tag,
        )
        .with_padding(self.padding_a.tag, self.padding_b.tag, self.padding_c.tag)
    }

    /// Output tiles.
    pub fn tiles(&self) -> usize {
        let (m, n, _) = self.l1_tile.loops(&self.problem);
        m * n
    }

    /// L1 tiles along K.
    pub fn k_tiles(&self) -> usize {
        self.l1_tile.loops(&self.problem).2
    }

    pub fn has_padding(&self) -> bool {
        self.padding_a.needs_pass() || self.padding_b.needs_pass() || self.padding_c.needs_pass()
    }

    /// Layouts the pipeline reads and writes (padded copies where padding applies).
    pub fn pipeline_layouts(&self) -> (Layout, Layout, Layout) {
        (self.padding_a.layout, self.padding_b.layout, self.padding_c.layout)
    }

    /// Same problem through the common pipeline behind `BlockNd` padding of A and B.
    pub fn with_block_padding(&self, policy: &PaddingPolicy) -> Result<Self> {
        let elem_bytes = self.element.size_in_bytes();
        let pad = |role, layout: Layout, block| -> Result<PaddingDecision> {
            if !layout.tag.is_nd() {
                return Ok(PaddingDecision::none(layout));
            }
            let desc = OperandDesc {
                role,
                layout,
                elem_bytes,
                loads: 1,
                block,
                c0: self.element.c0(),
            };
            Ok(PaddingDecision {
                tag: PaddingTag::BlockNd,
                layout: policy.padded_layout(&desc, PaddingTag::BlockNd)?,
                estimated_ns: 0.0,
            })
        };
        let mut params = self.clone();
        params.padding_a = pad(OperandRole::A, self.layout_a, (self.l1_tile.m, self.l1_tile.k))?;
        params.padding_b = pad(OperandRole::B, self.layout_b, (self.l1_tile.k, self.l1_tile.n))?;
        params.padding_c = PaddingDecision::none(self.layout_c);
        params.kernel = KernelSerial::PaddingCommon;
        params.reset_split();
        Ok(params)
    }

    /// Same problem through the common pipeline without padding.
    pub fn without_padding(&self) -> Self {
        let mut params = self.clone();
        params.padding_a = PaddingDecision::none(self.layout_a);
        params.padding_b = PaddingDecision::none(self.layout_b);
        params.padding_c = PaddingDecision::none(self.layout_c);
        params.kernel = KernelSerial::Common;
        params.reset_split();
        params
    }

    fn reset_split(&mut self) {
        self.split_k = 1;
        self.block_dim = self.tiles().clamp(1, self.compute_units);
    }
}

/// Vectors stored contiguously are described the same way whichever order
/// the caller named: a dense `1 × n` column-major operand is row-major, a
/// dense `n × 1` row-major operand is column-major.
pub fn normalize_layout(layout: Layout) -> Layout {
    match layout.tag {
        LayoutTag::ColumnMajor if layout.rows == 1 && layout.stride == 1 => {
            Layout::row_major(1, layout.cols)
        }
        LayoutTag::RowMajor if layout.cols == 1 && layout.stride == 1 => {
            Layout::column_major(layout.rows, 1)
        }
        _ => layout,
    }
}

/// L1 and L0 tiles for `problem`.
///
/// The L1 tile covers up to 128 × 128 outputs and as much K as fits
/// `stages` slots in L1; the L0 tile shares M and N and takes the largest
/// fractal-aligned K that fits two L0A/L0B buffers.
pub fn choose_tiles(
    problem: &ProblemShape,
    element: ElementType,
    config: &GemmConfig,
) -> Result<(TileShape, TileShape)> {
    let platform = &config.platform;
    let elem = element.size_in_bytes();
    let acc = element.accumulator_bytes();
    let c0 = element.c0();
    let stages = config.pipeline.stages.max(1);

    let l1 = match config.tiling.l1_tile {
        Some(tile) => tile,
        None => {
            let m1 = round_up(problem.m.max(1), FRACTAL_ROWS).min(MAX_TILE_MN);
            let n1 = round_up(problem.n.max(1), FRACTAL_ROWS).min(MAX_TILE_MN);
            let fit = platform.l1_bytes / stages / ((m1 + n1) * elem);
            let k1 = (fit / c0 * c0).max(c0).min(round_up(problem.k.max(1), c0));
            TileShape::new(m1, n1, k1)
        }
    };
    if l1.is_degenerate() {
        return Err(GemmError::InvalidConfig(format!("degenerate L1 tile {l1}")));
    }

    let k_rounded = round_up(l1.k, c0);
    let slot_bytes = (round_up(l1.m, FRACTAL_ROWS) + round_up(l1.n, FRACTAL_ROWS)) * k_rounded * elem;
    if slot_bytes * stages > platform.l1_bytes {
        return Err(GemmError::InvalidConfig(format!(
            "{stages} slots of L1 tile {l1} need {} bytes, L1 holds {}",
            slot_bytes * stages,
            platform.l1_bytes
        )));
    }
    if l1.m * l1.n * acc > platform.l0c_bytes {
        return Err(GemmError::InvalidConfig(format!(
            "L1 tile {l1} accumulator needs {} bytes, L0C holds {}",
            l1.m * l1.n * acc,
            platform.l0c_bytes
        )));
    }

    let k0_a = platform.l0a_bytes / 2 / (l1.m * acc);
    let k0_b = platform.l0b_bytes / 2 / (l1.n * acc);
    let k0 = (k0_a.min(k0_b) / c0 * c0).max(c0).min(l1.k);
    Ok((l1, TileShape::new(l1.m, l1.n, k0)))
}

/// Split-K factor that fills `units` with `tiles` output tiles, at most one
/// slice per K tile.
pub fn split_factor(tiles: usize, k_tiles: usize, units: usize) -> usize {
    if tiles == 0 {
        return 1;
    }
    (units / tiles).clamp(1, k_tiles.max(1))
}

/// Variant for a problem with `tiles` output tiles and `k_tiles` K tiles
/// on `units` compute units.
pub fn select_kernel(
    has_padding: bool,
    tiles: usize,
    k_tiles: usize,
    units: usize,
    split_k_min_k_tiles: usize,
) -> KernelSerial {
    if has_padding {
        KernelSerial::PaddingCommon
    } else if split_factor(tiles, k_tiles, units) >= 2 && k_tiles >= split_k_min_k_tiles {
        KernelSerial::SplitK
    } else if tiles <= units {
        KernelSerial::Small
    } else {
        KernelSerial::Common
    }
}

/// Computes the tiling parameters of `desc` under `config`.
pub fn do_tiling(desc: &GemmDescriptor, config: &GemmConfig) -> Result<TilingParams> {
    desc.validate()?;
    config.validate()?;

    let problem = desc.shape;
    let element = desc.element;
    let layout_a = normalize_layout(desc.layout_a);
    let layout_b = normalize_layout(desc.layout_b);
    let layout_c = normalize_layout(desc.layout_c);

    let (l1_tile, l0_tile) = choose_tiles(&problem, element, config)?;
    let swizzle = config
        .tiling
        .swizzle
        .unwrap_or_else(|| SwizzleConfig::for_problem(&problem));
    let (loops_m, loops_n, k_tiles) = l1_tile.loops(&problem);
    let tiles = loops_m * loops_n;
    let units = config.platform.compute_units();

    let policy = config.padding_policy();
    let operand = |role, layout, loads, block| OperandDesc {
        role,
        layout,
        elem_bytes: element.size_in_bytes(),
        loads,
        block,
        c0: element.c0(),
    };
    let mut padding_a = policy.decide(&operand(
        OperandRole::A,
        layout_a,
        loops_n.max(1),
        (l1_tile.m, l1_tile.k),
    ))?;
    let mut padding_b = policy.decide(&operand(
        OperandRole::B,
        layout_b,
        loops_m.max(1),
        (l1_tile.k, l1_tile.n),
    ))?;
    let mut padding_c = policy.decide(&operand(OperandRole::C, layout_c, 1, (l1_tile.m, l1_tile.n)))?;
    let has_padding = padding_a.needs_pass() || padding_b.needs_pass() || padding_c.needs_pass();

    let selected = select_kernel(
        has_padding,
        tiles,
        k_tiles,
        units,
        config.tiling.split_k_min_k_tiles,
    );
    let kernel = match config.tiling.kernel {
        Some(forced) => {
            if forced != KernelSerial::PaddingCommon {
                padding_a = PaddingDecision::none(layout_a);
                padding_b = PaddingDecision::none(layout_b);
                padding_c = PaddingDecision::none(layout_c);
            }
            forced
        }
        None => selected,
    };
    let split_k = match kernel {
        KernelSerial::SplitK => split_factor(tiles, k_tiles, units),
        _ => 1,
    };
    let block_dim = (tiles * split_k).clamp(1, units);

    let params = TilingParams {
        problem,
        element,
        layout_a,
        layout_b,
        layout_c,
        padding_a,
        padding_b,
        padding_c,
        l1_tile,
        l0_tile,
        swizzle,
        kernel,
        split_k,
        block_dim,
        compute_units: units,
        vector_units: config.platform.vector_units(),
        stages: config.pipeline.stages,
        shuffle_k: config.pipeline.shuffle_k,
    };
    log::debug!(
        "Tiling {} {}: L1 {} L0 {} swizzle {:?} kernel {} split {} block_dim {} key {}",
        element,
        problem,
        l1_tile,
        l0_tile,
        swizzle,
        kernel,
        split_k,
        block_dim,
        params.key()
    );
    Ok(params)
}
