//! Dispatch configuration with TOML support.
//!
//! Defaults carry the constants tuned for a 4-core Cortex-A76 board
//! (Raspberry Pi 5). Every section is `#[serde(default)]`, so a config file
//! only needs the keys it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TlgemmError};

/// Default upper bound on worker threads.
pub const DEFAULT_MAX_THREADS: usize = 4;

/// Hard ceiling accepted by [`PoolConfig::validate`].
pub const MAX_THREADS_LIMIT: usize = 64;

/// What an idle worker does while the queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleStrategy {
    /// Poll `try_pop` and yield between attempts. Burns the core, wakes fastest.
    Spin,
    /// Sleep on the queue's condition variable until a task or shutdown arrives.
    Block,
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of workers; the pool never exceeds the detected core count.
    pub max_threads: usize,
    /// Idle behaviour of workers.
    pub idle: IdleStrategy,
    /// Pin worker `i` to logical core `i % cores`.
    pub pin_cores: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            idle: IdleStrategy::Spin,
            pin_cores: true,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(TlgemmError::InvalidConfig("max_threads must be > 0".into()));
        }
        if self.max_threads > MAX_THREADS_LIMIT {
            return Err(TlgemmError::InvalidConfig(format!(
                "max_threads must be <= {}, got {}",
                MAX_THREADS_LIMIT, self.max_threads
            )));
        }
        Ok(())
    }
}

/// Size thresholds for the row-tile path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiledConfig {
    /// Below this many rows the tile path runs single-threaded.
    pub min_rows: usize,
    /// Below this contraction length the tile path runs single-threaded.
    pub min_k: usize,
}

impl Default for TiledConfig {
    fn default() -> Self {
        Self {
            min_rows: 512,
            min_k: 512,
        }
    }
}

/// Size thresholds and slicing for LUT preprocessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub min_rows: usize,
    pub min_k: usize,
    /// Smallest K slice handed to one worker.
    pub min_slice: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            min_rows: 1024,
            min_k: 1024,
            min_slice: 64,
        }
    }
}

/// Top-level configuration consumed by [`crate::Dispatcher`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub pool: PoolConfig,
    pub tiled: TiledConfig,
    pub preprocess: PreprocessConfig,
}

impl DispatchConfig {
    /// Validate all sections.
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        if self.preprocess.min_slice == 0 {
            return Err(TlgemmError::InvalidConfig(
                "preprocess.min_slice must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}
