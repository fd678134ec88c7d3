//! Runtime registry: tiling key -> kernel variant.

use crate::dispatch::tiling_key::{KernelSerial, TilingKey};
use crate::dispatch::variants::{CommonMatmul, GemmKernel, PaddingMatmul, SmallMatmul, SplitKMatmul};
use crate::element::Element;
use crate::error::{GemmError, Result};
use crate::matrix::layout::LayoutTag;
use crate::padding::policy::{OperandRole, PaddingTag};
use std::collections::HashMap;
use std::sync::Arc;

pub struct KernelRegistry<T: Element> {
    kernels: HashMap<TilingKey, Arc<dyn GemmKernel<T>>>,
}

impl<T: Element> Default for KernelRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> KernelRegistry<T> {
    pub fn new() -> Self {
        Self {
            kernels: HashMap::new(),
        }
    }

    /// Registry with every built-in variant for every layout combination of `T`.
    pub fn with_builtin_kernels() -> Self {
        let mut registry = Self::new();
        let common: Arc<dyn GemmKernel<T>> = Arc::new(CommonMatmul);
        let small: Arc<dyn GemmKernel<T>> = Arc::new(SmallMatmul);
        let split_k: Arc<dyn GemmKernel<T>> = Arc::new(SplitKMatmul);
        let padding: Arc<dyn GemmKernel<T>> = Arc::new(PaddingMatmul);

        for layout_a in LayoutTag::ALL {
            for layout_b in LayoutTag::ALL {
                for layout_c in LayoutTag::ALL {
                    let key = TilingKey::new(KernelSerial::Common, T::TYPE, layout_a, layout_b, layout_c);
                    for kernel in [&common, &small, &split_k] {
                        registry.register(key.with_kernel(kernel.serial()), Arc::clone(kernel));
                    }

                    let key = key.with_kernel(KernelSerial::PaddingCommon);
                    for &pad_a in padding_tags(OperandRole::A, layout_a) {
                        for &pad_b in padding_tags(OperandRole::B, layout_b) {
                            for &pad_c in padding_tags(OperandRole::C, layout_c) {
                                let key = key.with_padding(pad_a, pad_b, pad_c);
                                if key.has_padding() {
                                    registry.register(key, Arc::clone(&padding));
                                }
                            }
                        }
                    }
                }
            }
        }
        log::debug!("Built {} kernel registry: {} keys", T::TYPE, registry.len());
        registry
    }

    /// Registers `kernel` under `key`, replacing any previous entry.
    pub fn register(&mut self, key: TilingKey, kernel: Arc<dyn GemmKernel<T>>) {
        self.kernels.insert(key, kernel);
    }

    pub fn get(&self, key: &TilingKey) -> Result<&Arc<dyn GemmKernel<T>>> {
        self.kernels.get(key).ok_or(GemmError::NoKernel(*key))
    }

    pub fn contains(&self, key: &TilingKey) -> bool {
        self.kernels.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TilingKey> {
        self.kernels.keys()
    }
}

/// Padding tags that can appear for an operand stored as `layout`.
fn padding_tags(role: OperandRole, layout: LayoutTag) -> &'static [PaddingTag] {
    if !layout.is_nd() {
        &[PaddingTag::None]
    } else if role == OperandRole::C {
        &[PaddingTag::None, PaddingTag::Nd]
    } else {
        &PaddingTag::ALL
    }
}
