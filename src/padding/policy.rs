//! Padding decision: stream an operand as it is, or reformat it first.
//!
//! The decision is made once per invocation and per operand by comparing
//! estimated transfer times:
//!
//! | Candidate | Estimated time                                                     |
//! |-----------|--------------------------------------------------------------------|
//! | `None`    | streamed bytes / (peak × run efficiency × alignment efficiency)    |
//! | `Nd`      | reformat pass + streamed bytes / (peak × run efficiency)           |
//! | `BlockNd` | reformat pass + streamed padded bytes / (peak × tile efficiency)   |
//!
//! Only the direct path depends on the stride alignment, and its cost only
//! grows as alignment shrinks, so lowering alignment can flip the decision
//! towards padding but never away from it.
//!
//! Hard overrides remove candidates before the comparison:
//! - a leading stride above [`MAX_ADDRESSABLE_STRIDE`] cannot be streamed
//!   directly, and rules out `Nd` too when the aligned stride is still too big;
//! - a tiny inner extent with a huge outer extent is never streamed directly.
//!
//! `Nz` is never picked by the cost model; it is available when forced.

use crate::error::{GemmError, Result};
use crate::matrix::layout::{FRACTAL_ROWS, Layout, LayoutTag, MAX_ADDRESSABLE_STRIDE};
use crate::matrix::shape::round_up;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PaddingTag {
    None = 0,
    Nd = 1,
    BlockNd = 2,
    Nz = 3,
}

impl PaddingTag {
    pub const ALL: [PaddingTag; 4] = [
        PaddingTag::None,
        PaddingTag::Nd,
        PaddingTag::BlockNd,
        PaddingTag::Nz,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.tag() == tag)
    }
}

impl fmt::Display for PaddingTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaddingTag::None => "none",
            PaddingTag::Nd => "nd",
            PaddingTag::BlockNd => "block_nd",
            PaddingTag::Nz => "nz",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandRole {
    A,
    B,
    C,
}

impl OperandRole {
    pub fn name(self) -> char {
        match self {
            OperandRole::A => 'A',
            OperandRole::B => 'B',
            OperandRole::C => 'C',
        }
    }
}

/// Transfer cost model. The defaults are uncalibrated host values; measure
/// the target and override them in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    pub peak_bytes_per_ns: f64,
    /// Contiguous run length that reaches peak bandwidth.
    pub burst_bytes: usize,
    /// Stride alignment that reaches peak bandwidth. Power of two.
    pub target_alignment_bytes: usize,
    /// Alignment efficiency of a 1-byte aligned stride.
    pub misaligned_efficiency: f64,
    /// Fixed cost of launching a reformat pass.
    pub pass_overhead_ns: f64,
    /// Stride alignment produced by `Nd` padding.
    pub nd_align_bytes: usize,
    pub small_inner_bytes: usize,
    pub large_outer_extent: usize,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            peak_bytes_per_ns: 16.0,
            burst_bytes: 256,
            target_alignment_bytes: 64,
            misaligned_efficiency: 0.5,
            pass_overhead_ns: 20_000.0,
            nd_align_bytes: 512,
            small_inner_bytes: 32,
            large_outer_extent: 8192,
        }
    }
}

impl CostModel {
    pub fn validate(&self) -> Result<()> {
        if !(self.peak_bytes_per_ns > 0.0) {
            return Err(GemmError::InvalidConfig("peak_bytes_per_ns must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.misaligned_efficiency) || self.misaligned_efficiency == 0.0 {
            return Err(GemmError::InvalidConfig(
                "misaligned_efficiency must be in (0, 1]".into(),
            ));
        }
        if !self.target_alignment_bytes.is_power_of_two() || self.burst_bytes == 0 || self.nd_align_bytes == 0 {
            return Err(GemmError::InvalidConfig(
                "target_alignment_bytes must be a power of two, burst and nd alignment non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Fraction of peak reached by runs of `inner_bytes` contiguous bytes.
    pub fn run_efficiency(&self, inner_bytes: usize) -> f64 {
        (inner_bytes.max(1) as f64 / self.burst_bytes as f64).min(1.0)
    }

    /// Fraction of peak reached with a stride aligned to `2^align_log2` bytes.
    /// Non-decreasing in `align_log2`.
    pub fn alignment_efficiency(&self, align_log2: u32) -> f64 {
        let target = self.target_alignment_bytes.max(1).ilog2();
        if align_log2 >= target || target == 0 {
            return 1.0;
        }
        let fraction = align_log2 as f64 / target as f64;
        self.misaligned_efficiency + (1.0 - self.misaligned_efficiency) * fraction
    }

    fn stream_ns(&self, bytes: f64, efficiency: f64) -> f64 {
        bytes / (self.peak_bytes_per_ns * efficiency)
    }
}

/// What the policy needs to know about one operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperandDesc {
    pub role: OperandRole,
    pub layout: Layout,
    pub elem_bytes: usize,
    /// How many times the pipeline streams every element.
    pub loads: usize,
    /// Tile used as the block of `BlockNd` padding (rows, cols).
    pub block: (usize, usize),
    /// Fractal width in elements for `Nz` padding.
    pub c0: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaddingDecision {
    pub tag: PaddingTag,
    /// Layout the pipeline reads (A, B) or writes (C).
    pub layout: Layout,
    pub estimated_ns: f64,
}

impl PaddingDecision {
    pub fn none(layout: Layout) -> Self {
        Self {
            tag: PaddingTag::None,
            layout,
            estimated_ns: 0.0,
        }
    }

    pub fn needs_pass(&self) -> bool {
        self.tag != PaddingTag::None
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaddingPolicy {
    model: CostModel,
    forced: [Option<PaddingTag>; 3],
}

impl PaddingPolicy {
    pub fn new(model: CostModel) -> Self {
        Self {
            model,
            forced: [None; 3],
        }
    }

    /// Bypasses the cost model for `role`.
    pub fn with_forced(mut self, role: OperandRole, tag: Option<PaddingTag>) -> Self {
        self.forced[role as usize] = tag;
        self
    }

    pub fn model(&self) -> &CostModel {
        &self.model
    }

    pub fn decide(&self, operand: &OperandDesc) -> Result<PaddingDecision> {
        let align_log2 = operand.layout.stride_alignment_log2(operand.elem_bytes);
        self.decide_with_alignment(operand, align_log2)
    }

    /// Same as [`decide`](Self::decide) with an explicit stride alignment (log2 bytes).
    pub fn decide_with_alignment(&self, operand: &OperandDesc, align_log2: u32) -> Result<PaddingDecision> {
        if !operand.layout.tag.is_nd() {
            return Ok(PaddingDecision::none(operand.layout));
        }
        if let Some(tag) = self.forced[operand.role as usize] {
            let layout = self.padded_layout(operand, tag)?;
            return Ok(PaddingDecision {
                tag,
                layout,
                estimated_ns: self.estimate(operand, tag, &layout, align_log2),
            });
        }

        let mut best: Option<PaddingDecision> = None;
        for tag in self.candidates(operand) {
            let layout = self.padded_layout(operand, tag)?;
            let estimated_ns = self.estimate(operand, tag, &layout, align_log2);
            if best.is_none_or(|b| estimated_ns < b.estimated_ns) {
                best = Some(PaddingDecision {
                    tag,
                    layout,
                    estimated_ns,
                });
            }
        }

        let decision = best.unwrap_or_else(|| PaddingDecision::none(operand.layout));
        log::debug!(
            "Padding {}: {} -> {} ({:.0} ns est.)",
            operand.role.name(),
            operand.layout,
            decision.tag,
            decision.estimated_ns
        );
        Ok(decision)
    }

    /// Candidates that survive the hard overrides, in tie-break order.
    fn candidates(&self, operand: &OperandDesc) -> Vec<PaddingTag> {
        let layout = &operand.layout;
        let inner_bytes = layout.inner_extent() * operand.elem_bytes;
        let pathological = inner_bytes < self.model.small_inner_bytes
            && layout.outer_extent() >= self.model.large_outer_extent;

        let mut tags = Vec::with_capacity(3);
        if layout.is_addressable() && !pathological {
            tags.push(PaddingTag::None);
        }
        if round_up(layout.inner_extent(), self.nd_align_elems(operand)) <= MAX_ADDRESSABLE_STRIDE {
            tags.push(PaddingTag::Nd);
        }
        if operand.role != OperandRole::C {
            tags.push(PaddingTag::BlockNd);
        }
        tags
    }

    fn nd_align_elems(&self, operand: &OperandDesc) -> usize {
        (self.model.nd_align_bytes / operand.elem_bytes.max(1)).max(1)
    }

    /// Layout of the reformatted copy for `tag`.
    pub fn padded_layout(&self, operand: &OperandDesc, tag: PaddingTag) -> Result<Layout> {
        let l = &operand.layout;
        let (rows, cols) = (l.rows, l.cols);
        let column_major = l.tag == LayoutTag::ColumnMajor;
        let layout = match (tag, operand.role) {
            (PaddingTag::None, _) => *l,
            (PaddingTag::Nd, _) => {
                let align = self.nd_align_elems(operand);
                if column_major {
                    Layout::column_major_with_stride(rows, cols, round_up(rows, align).max(1))
                } else {
                    Layout::row_major_with_stride(rows, cols, round_up(cols, align).max(1))
                }
            }
            (PaddingTag::BlockNd, OperandRole::A | OperandRole::B) => {
                let (br, bc) = operand.block;
                if column_major {
                    Layout::padding_column_major(rows, cols, br, bc)
                } else {
                    Layout::padding_row_major(rows, cols, br, bc)
                }
            }
            (PaddingTag::Nz, OperandRole::A) => Layout::zn(rows, cols, FRACTAL_ROWS, operand.c0),
            (PaddingTag::Nz, OperandRole::B) => Layout::nz(rows, cols, operand.c0, FRACTAL_ROWS),
            (tag, OperandRole::C) => {
                return Err(GemmError::InvalidConfig(format!(
                    "operand C supports only none/nd padding, got {tag}"
                )));
            }
        };
        Ok(layout)
    }

    fn estimate(&self, operand: &OperandDesc, tag: PaddingTag, padded: &Layout, align_log2: u32) -> f64 {
        let model = &self.model;
        let l = &operand.layout;
        let elem = operand.elem_bytes as f64;
        let logical_bytes = (l.rows * l.cols) as f64 * elem;
        let streamed = logical_bytes * operand.loads.max(1) as f64;
        let inner_eff = model.run_efficiency(l.inner_extent() * operand.elem_bytes);

        if tag == PaddingTag::None {
            return model.stream_ns(streamed, inner_eff * model.alignment_efficiency(align_log2));
        }

        let padded_bytes = padded.capacity() as f64 * elem;
        let pass = model.pass_overhead_ns
            + model.stream_ns(logical_bytes, inner_eff)
            + model.stream_ns(padded_bytes, 1.0);
        let padded_streamed = padded_bytes * operand.loads.max(1) as f64;
        let run = match tag {
            PaddingTag::Nd => model.stream_ns(streamed, inner_eff),
            _ => model.stream_ns(
                padded_streamed,
                model.run_efficiency(padded.block_rows * padded.block_cols * operand.elem_bytes),
            ),
        };
        pass + run
    }
}
