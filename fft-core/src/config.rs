//! # Engine Configuration Module
//!
//! Serializable engine settings, so a consumer can keep its transform size
//! and pool size in a JSON file next to its other settings.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, Result};

/// Construction parameters for [`crate::Engine::from_config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base-2 logarithm of the transform size.
    pub nu: u32,
    /// Worker thread hint. `None` follows the number of available CPUs.
    #[serde(default)]
    pub threads: Option<usize>,
}

impl Default for EngineConfig {
    /// 8192 samples, the size a tuner at ~5.5 kHz needs for sub-Hz bins.
    fn default() -> Self {
        Self { nu: 13, threads: None }
    }
}

impl EngineConfig {
    pub fn new(nu: u32, threads: Option<usize>) -> Self {
        Self { nu, threads }
    }

    /// Parses a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Pretty-printed JSON, readable back with [`EngineConfig::from_json`].
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Transform size `2^nu`, if `nu` is in range.
    pub fn size(&self) -> Option<usize> {
        (1..=crate::MAX_NU)
            .contains(&self.nu)
            .then(|| 1usize << self.nu)
    }
}
