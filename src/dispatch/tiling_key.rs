//! Compact key of the problem-dependent choices that select a kernel variant.
//!
//! ```text
//!  63      56 55  52 51            24 23 20 19 16 15 12 11  8 7   4 3   0
//! ┌──────────┬──────┬────────────────┬─────┬─────┬─────┬─────┬─────┬─────┐
//! │  kernel  │dtype │    reserved    │pad A│pad B│pad C│lay A│lay B│lay C│
//! └──────────┴──────┴────────────────┴─────┴─────┴─────┴─────┴─────┴─────┘
//! ```
//!
//! Reserved bits are zero; [`TilingKey::from_bits`] rejects anything else.

use crate::element::ElementType;
use crate::error::{GemmError, Result};
use crate::matrix::layout::LayoutTag;
use crate::padding::policy::PaddingTag;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const LAYOUT_C_SHIFT: u32 = 0;
const LAYOUT_B_SHIFT: u32 = 4;
const LAYOUT_A_SHIFT: u32 = 8;
const PADDING_C_SHIFT: u32 = 12;
const PADDING_B_SHIFT: u32 = 16;
const PADDING_A_SHIFT: u32 = 20;
const RESERVED_SHIFT: u32 = 24;
const RESERVED_BITS: u32 = 28;
const ELEMENT_SHIFT: u32 = 52;
const KERNEL_SHIFT: u32 = 56;

const NIBBLE: u64 = 0xf;

/// Pipeline variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum KernelSerial {
    /// Multi-stage pipeline with cross-block prefetch.
    Common = 0,
    /// At most one tile per unit.
    Small = 1,
    /// Common pipeline behind a padding pass.
    PaddingCommon = 2,
    /// K split into slices, partial sums reduced afterwards.
    SplitK = 3,
}

impl KernelSerial {
    pub const ALL: [KernelSerial; 4] = [
        KernelSerial::Common,
        KernelSerial::Small,
        KernelSerial::PaddingCommon,
        KernelSerial::SplitK,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            KernelSerial::Common => "common",
            KernelSerial::Small => "small",
            KernelSerial::PaddingCommon => "padding_common",
            KernelSerial::SplitK => "split_k",
        }
    }
}

impl fmt::Display for KernelSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KernelSerial {
    type Err = GemmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s.to_ascii_lowercase())
            .ok_or_else(|| GemmError::InvalidConfig(format!("unknown kernel `{s}`")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilingKey {
    pub kernel: KernelSerial,
    pub element: ElementType,
    pub layout_a: LayoutTag,
    pub layout_b: LayoutTag,
    pub layout_c: LayoutTag,
    pub padding_a: PaddingTag,
    pub padding_b: PaddingTag,
    pub padding_c: PaddingTag,
}

impl TilingKey {
    /// Key with no padding on any operand.
    pub fn new(
        kernel: KernelSerial,
        element: ElementType,
        layout_a: LayoutTag,
        layout_b: LayoutTag,
        layout_c: LayoutTag,
    ) -> Self {
        Self {
            kernel,
            element,
            layout_a,
            layout_b,
            layout_c,
            padding_a: PaddingTag::None,
            padding_b: PaddingTag::None,
            padding_c: PaddingTag::None,
        }
    }

    pub fn with_padding(mut self, a: PaddingTag, b: PaddingTag, c: PaddingTag) -> Self {
        self.padding_a = a;
        self.padding_b = b;
        self.padding_c = c;
        self
    }

    pub fn with_kernel(mut self, kernel: KernelSerial) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn has_padding(&self) -> bool {
        self.padding_a != PaddingTag::None
            || self.padding_b != PaddingTag::None
            || self.padding_c != PaddingTag::None
    }

    pub fn to_bits(&self) -> u64 {
        (u64::from(self.layout_c.tag()) << LAYOUT_C_SHIFT)
            | (u64::from(self.layout_b.tag()) << LAYOUT_B_SHIFT)
            | (u64::from(self.layout_a.tag()) << LAYOUT_A_SHIFT)
            | (u64::from(self.padding_c.tag()) << PADDING_C_SHIFT)
            | (u64::from(self.padding_b.tag()) << PADDING_B_SHIFT)
            | (u64::from(self.padding_a.tag()) << PADDING_A_SHIFT)
            | (u64::from(self.element.tag()) << ELEMENT_SHIFT)
            | (u64::from(self.kernel.tag()) << KERNEL_SHIFT)
    }

    pub fn from_bits(bits: u64) -> Result<Self> {
        let invalid = |reason: String| GemmError::InvalidTilingKey { bits, reason };
        let nibble = |shift: u32| ((bits >> shift) & NIBBLE) as u8;

        let reserved = (bits >> RESERVED_SHIFT) & ((1u64 << RESERVED_BITS) - 1);
        if reserved != 0 {
            return Err(invalid(format!("reserved bits set: 0x{reserved:x}")));
        }

        let layout = |shift: u32, name: &str| {
            LayoutTag::from_tag(nibble(shift))
                .ok_or_else(|| invalid(format!("bad layout tag {} for {name}", nibble(shift))))
        };
        let padding = |shift: u32, name: &str| {
            PaddingTag::from_tag(nibble(shift))
                .ok_or_else(|| invalid(format!("bad padding tag {} for {name}", nibble(shift))))
        };

        let element = ElementType::from_tag(nibble(ELEMENT_SHIFT))
            .ok_or_else(|| invalid(format!("bad element tag {}", nibble(ELEMENT_SHIFT))))?;
        let kernel_tag = (bits >> KERNEL_SHIFT) as u8;
        let kernel = KernelSerial::from_tag(kernel_tag)
            .ok_or_else(|| invalid(format!("bad kernel serial {kernel_tag}")))?;

        Ok(Self {
            kernel,
            element,
            layout_a: layout(LAYOUT_A_SHIFT, "A")?,
            layout_b: layout(LAYOUT_B_SHIFT, "B")?,
            layout_c: layout(LAYOUT_C_SHIFT, "C")?,
            padding_a: padding(PADDING_A_SHIFT, "A")?,
            padding_b: padding(PADDING_B_SHIFT, "B")?,
            padding_c: padding(PADDING_C_SHIFT, "C")?,
        })
    }
}

impl fmt::Display for TilingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.to_bits())
    }
}

impl From<TilingKey> for u64 {
    fn from(key: TilingKey) -> u64 {
        key.to_bits()
    }
}

impl TryFrom<u64> for TilingKey {
    type Error = GemmError;

    fn try_from(bits: u64) -> Result<Self> {
        Self::from_bits(bits)
    }
}
