//! Global configuration.
//!
//! Loaded once from `tilegemm.toml` (current directory or any parent), then
//! patched from the environment:
//!
//! | Variable                 | Field                       |
//! |--------------------------|-----------------------------|
//! | `TILEGEMM_COMPUTE_UNITS` | `platform.compute_units`    |
//! | `TILEGEMM_VECTOR_UNITS`  | `platform.vector_units`     |
//! | `TILEGEMM_STAGES`        | `pipeline.stages`           |
//! | `TILEGEMM_SHUFFLE_K`     | `pipeline.shuffle_k`        |
//!
//! ```toml
//! [platform]
//! compute_units = 8
//!
//! [pipeline]
//! stages = 2
//! shuffle_k = false
//!
//! [tiling]
//! l1_tile = { m = 128, n = 128, k = 64 }
//! swizzle = { offset = 3, direction = "row_band" }
//! ```

use crate::blocked::swizzle::SwizzleConfig;
use crate::dispatch::tiling_key::KernelSerial;
use crate::error::{GemmError, Result};
use crate::matrix::shape::TileShape;
use crate::padding::policy::{CostModel, OperandRole, PaddingPolicy, PaddingTag};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

static GLOBAL_CONFIG: Mutex<Option<Arc<GemmConfig>>> = Mutex::new(None);

const CONFIG_FILE_NAME: &str = "tilegemm.toml";

#[derive(Default, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GemmConfig {
    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub tiling: TilingConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub cost_model: CostModel,
}

/// Compute unit counts and on-chip buffer capacities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Compute (cube) units. `None` means one per available CPU.
    pub compute_units: Option<usize>,
    /// Vector units used by padding passes. `None` means as many as compute units.
    pub vector_units: Option<usize>,
    pub l1_bytes: usize,
    pub l0a_bytes: usize,
    pub l0b_bytes: usize,
    pub l0c_bytes: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            compute_units: None,
            vector_units: None,
            l1_bytes: 512 * 1024,
            l0a_bytes: 64 * 1024,
            l0b_bytes: 64 * 1024,
            l0c_bytes: 128 * 1024,
        }
    }
}

impl PlatformConfig {
    pub fn compute_units(&self) -> usize {
        self.compute_units
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }

    pub fn vector_units(&self) -> usize {
        self.vector_units.unwrap_or_else(|| self.compute_units()).max(1)
    }
}

/// Overrides for the automatic tiling and kernel selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub l1_tile: Option<TileShape>,
    pub swizzle: Option<SwizzleConfig>,
    pub kernel: Option<KernelSerial>,
    pub padding_a: Option<PaddingTag>,
    pub padding_b: Option<PaddingTag>,
    pub padding_c: Option<PaddingTag>,
    /// Split-K is considered only when K spans at least this many L1 tiles.
    pub split_k_min_k_tiles: usize,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            l1_tile: None,
            swizzle: None,
            kernel: None,
            padding_a: None,
            padding_b: None,
            padding_c: None,
            split_k_min_k_tiles: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Buffer slots per unit; 2 is double buffering.
    pub stages: usize,
    /// Rotate the first K sub-tile by unit id.
    pub shuffle_k: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: 2,
            shuffle_k: true,
        }
    }
}

impl GemmConfig {
    /// Retrieves the global configuration, loading it on first use.
    pub fn get() -> Arc<Self> {
        let mut state = GLOBAL_CONFIG.lock().unwrap_or_else(|e| e.into_inner());
        state
            .get_or_insert_with(|| Arc::new(Self::from_current_dir().override_from_env()))
            .clone()
    }

    /// Sets the global configuration. Must happen before the first [`get`](Self::get).
    pub fn set(config: Self) -> Result<()> {
        config.validate()?;
        let mut state = GLOBAL_CONFIG.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_some() {
            return Err(GemmError::InvalidConfig(
                "global configuration is already initialized".to_string(),
            ));
        }
        *state = Some(Arc::new(config));
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GemmError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GemmError::InvalidConfig(e.to_string()))
    }

    /// Overrides fields from the process environment.
    pub fn override_from_env(self) -> Self {
        self.override_from(|key| std::env::var(key).ok())
    }

    /// Overrides fields from `lookup`; unparsable values are ignored.
    pub fn override_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(units) = lookup("TILEGEMM_COMPUTE_UNITS").and_then(|v| v.parse().ok()) {
            self.platform.compute_units = Some(units);
        }
        if let Some(units) = lookup("TILEGEMM_VECTOR_UNITS").and_then(|v| v.parse().ok()) {
            self.platform.vector_units = Some(units);
        }
        if let Some(stages) = lookup("TILEGEMM_STAGES").and_then(|v| v.parse().ok()) {
            self.pipeline.stages = stages;
        }
        if let Some(val) = lookup("TILEGEMM_SHUFFLE_K") {
            match val.as_str() {
                "1" | "true" | "on" => self.pipeline.shuffle_k = true,
                "0" | "false" | "off" => self.pipeline.shuffle_k = false,
                _ => {}
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.stages == 0 {
            return Err(GemmError::InvalidConfig("pipeline.stages must be at least 1".into()));
        }
        if self.platform.compute_units == Some(0) || self.platform.vector_units == Some(0) {
            return Err(GemmError::InvalidConfig("unit counts must be at least 1".into()));
        }
        if let Some(tile) = self.tiling.l1_tile {
            if tile.is_degenerate() {
                return Err(GemmError::InvalidConfig(format!("degenerate l1_tile {tile}")));
            }
        }
        if let Some(swizzle) = self.tiling.swizzle {
            swizzle.validate()?;
        }
        if matches!(self.tiling.padding_c, Some(PaddingTag::BlockNd | PaddingTag::Nz)) {
            return Err(GemmError::InvalidConfig(
                "padding_c supports only none/nd".into(),
            ));
        }
        self.cost_model.validate()
    }

    /// Padding policy with this config's cost model and forced tags.
    pub fn padding_policy(&self) -> PaddingPolicy {
        PaddingPolicy::new(self.cost_model.clone())
            .with_forced(OperandRole::A, self.tiling.padding_a)
            .with_forced(OperandRole::B, self.tiling.padding_b)
            .with_forced(OperandRole::C, self.tiling.padding_c)
    }

    // Walks up from the current directory looking for `tilegemm.toml`.
    fn from_current_dir() -> Self {
        let Ok(mut dir) = std::env::current_dir() else {
            return Self::default();
        };
        loop {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                match Self::from_file_path(&candidate) {
                    Ok(config) => {
                        log::debug!("Loaded config from {}", candidate.display());
                        return config;
                    }
                    Err(err) => {
                        log::warn!("Ignoring {}: {}", candidate.display(), err);
                    }
                }
            }
            if !dir.pop() {
                break;
            }
        }
        Self::default()
    }
}
