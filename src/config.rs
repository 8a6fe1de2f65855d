//! Engine configuration
//!
//! One flat config object with a nested mixer section, loadable from a JSON
//! file. Every field has a default, so a partial file (or none at all) works.

use crate::discover::DEFAULT_WORKERS;
use crate::mixer::MixerConfig;
use crate::room::DEFAULT_BATCH_CAP;
use crate::{ChimeError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Soundboard engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persisted resolution cache (JSON object, token to path or null).
    pub cache_file: PathBuf,
    /// Directory holding stored sound assets.
    pub sounds_dir: PathBuf,
    /// Max assets consumed by one drain cycle.
    pub batch_cap: usize,
    /// Worker threads resolving unknown emoji.
    pub discovery_workers: usize,
    /// Literal confirmation required by the destructive reset command.
    pub confirm_phrase: String,
    /// Overlap mixer settings.
    pub mixer: MixerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_file: PathBuf::from("emoji_cache.json"),
            sounds_dir: PathBuf::from("sounds"),
            batch_cap: DEFAULT_BATCH_CAP,
            discovery_workers: DEFAULT_WORKERS,
            confirm_phrase: "please".to_string(),
            mixer: MixerConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .map_err(|e| ChimeError::Config(format!("failed to read '{}': {}", path.display(), e)))?;
        let cfg: Config = serde_json::from_slice(&bytes)
            .map_err(|e| ChimeError::Config(format!("failed to parse '{}': {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_cap == 0 {
            return Err(ChimeError::Config("batch_cap must be at least 1".to_string()));
        }
        if self.discovery_workers == 0 {
            return Err(ChimeError::Config(
                "discovery_workers must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.mixer.overlap) {
            return Err(ChimeError::Config(
                "mixer.overlap must be within 0.0..1.0".to_string(),
            ));
        }
        if self.mixer.gain <= 0.0 || self.mixer.gain > 1.0 {
            return Err(ChimeError::Config(
                "mixer.gain must be within (0.0, 1.0]".to_string(),
            ));
        }
        if self.confirm_phrase.trim().is_empty() {
            return Err(ChimeError::Config(
                "confirm_phrase must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
