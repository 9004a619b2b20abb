//! Configuration for the macrotask layer
//!
//! This module provides a serde-backed TOML config that supports:
//! - Auto-generation of default config files
//! - Manual reload capability
//! - Tuning the drain budget without recompiling
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use deferloop_core::QueueConfig;
//!
//! let config = QueueConfig::load(Path::new("deferloop.toml")).unwrap_or_default();
//! let queue = MacrotaskQueue::bind_with_budget(host, config.drain_budget());
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration system errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read or write config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML content
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config to TOML
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Macrotask queue configuration
///
/// Unknown keys are ignored and missing keys fall back to their defaults,
/// so old config files keep working across upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Config version for future migration support
    pub version: u32,

    /// Wall-clock budget of one drain pass, in milliseconds
    pub drain_budget_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            version: 1,
            drain_budget_ms: 16,
        }
    }
}

impl QueueConfig {
    /// Load config from `path`, creating a default file if missing
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            tracing::debug!("Loaded queue config from {:?}", path);
            Ok(config)
        } else {
            let default = Self::default();
            default.save(path)?;
            tracing::info!("Created default queue config at {:?}", path);
            Ok(default)
        }
    }

    /// Save config to `path`
    ///
    /// Creates parent directories if they don't exist.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!("Saved queue config to {:?}", path);
        Ok(())
    }

    /// Reload config from `path`, updating self with the file contents
    pub fn reload(&mut self, path: &Path) -> ConfigResult<()> {
        let content = std::fs::read_to_string(path)?;
        *self = toml::from_str(&content)?;
        tracing::debug!("Reloaded queue config from {:?}", path);
        Ok(())
    }

    /// Drain budget as a [`Duration`]
    pub fn drain_budget(&self) -> Duration {
        Duration::from_millis(self.drain_budget_ms)
    }
}
