//! Configuration loading for the demo shaper.
//!
//! Parses `scriven.toml` (or an explicit override path), extracting cache
//! capacity and trace emission settings. Unknown fields are ignored so the
//! file can grow without breaking older binaries; a malformed file falls
//! back to defaults rather than aborting startup. Configuration only sizes
//! capacities and diagnostics; it never changes shaping output.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_max_segments")]
    pub max_segments: usize,
    #[serde(default = "CacheConfig::default_enabled")]
    pub enabled: bool,
}

impl CacheConfig {
    const fn default_max_segments() -> usize {
        64
    }
    const fn default_enabled() -> bool {
        true
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_segments: Self::default_max_segments(),
            enabled: Self::default_enabled(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct TraceConfig {
    /// Emit the structured shaping trace even without `--trace-out`
    /// (written to stdout).
    #[serde(default)]
    pub emit: bool,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub trace: TraceConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub file: ConfigFile,
}

impl Config {
    /// Cache capacity clamped to a sane floor; zero would thrash.
    pub fn effective_max_segments(&self) -> usize {
        self.file.cache.max_segments.max(1)
    }
}

/// Best-effort config path: working directory first, then the platform
/// config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("scriven.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("scriven").join("scriven.toml");
    }
    PathBuf::from("scriven.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(target: "config", path = %path.display(), "config loaded");
                Ok(Config { file })
            }
            Err(_e) => Ok(Config::default()),
        }
    } else {
        Ok(Config::default())
    }
}
