//! Element and accumulator types.
//!
//! Every operand element type has an accumulator type used in the L0 buffers
//! and the L0C result accumulator:
//!
//! | Element | Accumulator | Tag |
//! |---------|-------------|-----|
//! | `f16`   | `f32`       | 0   |
//! | `f32`   | `f32`       | 1   |
//! | `f64`   | `f64`       | 2   |
//!
//! Conversion to the accumulator happens on the L1 -> L0 copy, conversion back
//! happens once per output element when the accumulator is written out.

use crate::dispatch::registry::KernelRegistry;
use crate::error::{GemmError, Result};
use half::f16;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::ops::{Add, Mul};
use std::str::FromStr;

/// Element type tag carried by descriptors and tiling keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ElementType {
    F16 = 0,
    F32 = 1,
    F64 = 2,
}

impl ElementType {
    pub const ALL: [ElementType; 3] = [ElementType::F16, ElementType::F32, ElementType::F64];

    pub fn size_in_bytes(self) -> usize {
        match self {
            ElementType::F16 => 2,
            ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }

    /// Size of the accumulator type.
    pub fn accumulator_bytes(self) -> usize {
        match self {
            ElementType::F16 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }

    /// Elements per 32-byte fractal row.
    pub fn c0(self) -> usize {
        32 / self.size_in_bytes()
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.tag() == tag)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::F16 => "f16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        };
        f.write_str(name)
    }
}

impl FromStr for ElementType {
    type Err = GemmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f16" | "half" | "fp16" => Ok(ElementType::F16),
            "f32" | "float" | "fp32" => Ok(ElementType::F32),
            "f64" | "double" | "fp64" => Ok(ElementType::F64),
            other => Err(GemmError::InvalidConfig(format!("unknown element type `{other}`"))),
        }
    }
}

/// Accumulator arithmetic used by the multiply-accumulate block.
pub trait Accumulator:
    Copy + Default + Debug + PartialEq + Send + Sync + Add<Output = Self> + Mul<Output = Self> + 'static
{
    /// `acc[j] = acc[j] + a * b[j]` for every `j`, in ascending `j`.
    ///
    /// Implementations must not fuse the multiply and the add: the result has
    /// to match the scalar expression bit for bit.
    fn axpy(acc: &mut [Self], a: Self, b: &[Self]) {
        axpy_scalar(acc, a, b);
    }
}

#[inline]
fn axpy_scalar<A: Accumulator>(acc: &mut [A], a: A, b: &[A]) {
    for (c, &bv) in acc.iter_mut().zip(b) {
        *c = *c + a * bv;
    }
}

impl Accumulator for f32 {}

impl Accumulator for f64 {
    fn axpy(acc: &mut [f64], a: f64, b: &[f64]) {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") {
                unsafe { crate::kernels::mmad::axpy_f64_avx2(acc, a, b) };
                return;
            }
        }
        axpy_scalar(acc, a, b);
    }
}

/// Operand element type.
pub trait Element: Copy + Default + Debug + PartialEq + Send + Sync + 'static {
    type Acc: Accumulator;

    const TYPE: ElementType;

    fn to_acc(self) -> Self::Acc;

    fn from_acc(acc: Self::Acc) -> Self;

    fn from_f64(value: f64) -> Self;

    fn to_f64(self) -> f64;

    /// Kernel variants registered for this element type. Built on first use.
    fn registry() -> &'static KernelRegistry<Self>;

    fn c0() -> usize {
        Self::TYPE.c0()
    }
}

macro_rules! impl_registry {
    ($t:ty) => {
        fn registry() -> &'static KernelRegistry<$t> {
            static REGISTRY: OnceCell<KernelRegistry<$t>> = OnceCell::new();
            REGISTRY.get_or_init(KernelRegistry::with_builtin_kernels)
        }
    };
}

impl Element for f16 {
    type Acc = f32;
    const TYPE: ElementType = ElementType::F16;

    fn to_acc(self) -> f32 {
        self.to_f32()
    }

    fn from_acc(acc: f32) -> Self {
        f16::from_f32(acc)
    }

    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    impl_registry!(f16);
}

impl Element for f32 {
    type Acc = f32;
    const TYPE: ElementType = ElementType::F32;

    fn to_acc(self) -> f32 {
        self
    }

    fn from_acc(acc: f32) -> Self {
        acc
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    impl_registry!(f32);
}

impl Element for f64 {
    type Acc = f64;
    const TYPE: ElementType = ElementType::F64;

    fn to_acc(self) -> f64 {
        self
    }

    fn from_acc(acc: f64) -> Self {
        acc
    }

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }

    impl_registry!(f64);
}
