//! TOML configuration for the driver.
//!
//! ```toml
//! shuffle_seed = 42
//! concurrent = true
//!
//! [split]
//! block_width = 30
//! block_height = 30
//! overlap_horizontal = 0
//! overlap_vertical = 0
//!
//! [mask]
//! suffix = "_mask"
//! color = "#00ff00"
//! mode = "lenient"
//! invert = false
//! threshold_percent = 10
//! ```

use crate::core_modules::mask::{DEFAULT_MASK_COLOR, MaskMode, hex_to_rgb};
use crate::core_modules::selector::{DEFAULT_THRESHOLD_PERCENT, SelectionRule};
use crate::core_modules::split_spec::{RawSplitSpec, SplitSpec};
use crate::error::{Error, Result};
use crate::pipeline::{CorpusOptions, DEFAULT_MASK_SUFFIX, MaskOptions};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_BLOCK_SIZE: usize = 30;

/// Settings for tiling and corpus assembly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrainerConfig {
    /// Required in files; [`TrainerConfig::default`] uses 30x30 blocks.
    #[serde(default)]
    pub split: Option<RawSplitSpec>,
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
    #[serde(default)]
    pub concurrent: bool,
    /// Worker cap for concurrent assembly; the CPU count when unset.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub mask: Option<MaskConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MaskConfig {
    #[serde(default = "default_suffix")]
    pub suffix: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub mode: MaskMode,
    #[serde(default)]
    pub invert: bool,
    #[serde(default = "default_threshold")]
    pub threshold_percent: u32,
}

fn default_suffix() -> String {
    DEFAULT_MASK_SUFFIX.to_string()
}

fn default_color() -> String {
    DEFAULT_MASK_COLOR.to_string()
}

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD_PERCENT
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            suffix: default_suffix(),
            color: default_color(),
            mode: MaskMode::default(),
            invert: false,
            threshold_percent: default_threshold(),
        }
    }
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            split: Some(RawSplitSpec {
                block_width: DEFAULT_BLOCK_SIZE,
                block_height: DEFAULT_BLOCK_SIZE,
                overlap_horizontal: 0,
                overlap_vertical: 0,
            }),
            shuffle_seed: None,
            concurrent: false,
            workers: None,
            mask: None,
        }
    }
}

impl TrainerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// The validated split; fails when it is missing or inconsistent.
    pub fn split_spec(&self) -> Result<SplitSpec> {
        SplitSpec::try_from(self.split)
    }

    pub fn corpus_options(&self) -> Result<CorpusOptions> {
        let mask = match &self.mask {
            Some(mask) => {
                hex_to_rgb(&mask.color)?;
                if mask.suffix.is_empty() {
                    return Err(Error::invalid("mask suffix must not be empty"));
                }
                Some(MaskOptions {
                    suffix: mask.suffix.clone(),
                    color: mask.color.clone(),
                    mode: mask.mode,
                    rule: SelectionRule {
                        invert: mask.invert,
                        threshold_percent: mask.threshold_percent,
                    },
                })
            }
            None => None,
        };
        Ok(CorpusOptions {
            split: self.split_spec()?,
            shuffle_seed: self.shuffle_seed,
            mask,
        })
    }
}
