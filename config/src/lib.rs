//! Configuration for ringcore.
//!
//! Read from `$RINGCORE_CONFIG` when set, otherwise `~/.ringcore/config.toml`.
//! Every section and field is optional:
//!
//! ```toml
//! [kernel]
//! min_rank = 1
//! max_rank = 7
//!
//! [evaluation]
//! timeout_ms = 5000
//!
//! [neighbors]
//! max_neighbors = 8
//! channel_capacity = 64
//!
//! [logging]
//! filter = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;
use thiserror::Error;
use toml::de::Error as TomlError;

pub const CONFIG_ENV_VAR: &str = "RINGCORE_CONFIG";

// Default value functions for serde
const fn default_min_rank() -> u8 {
    1
}

const fn default_max_rank() -> u8 {
    7
}

const fn default_timeout_ms() -> u64 {
    5_000
}

const fn default_max_neighbors() -> usize {
    8
}

const fn default_channel_capacity() -> usize {
    64
}

fn default_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CoreConfig {
    #[serde(default)]
    pub kernel: KernelConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub neighbors: NeighborConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rank range of the coordinate space.
///
/// `min_rank = 0` is accepted, so `[0, 6]` works as well as the default `[1, 7]`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KernelConfig {
    #[serde(default = "default_min_rank")]
    pub min_rank: u8,
    #[serde(default = "default_max_rank")]
    pub max_rank: u8,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            min_rank: default_min_rank(),
            max_rank: default_max_rank(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EvaluationConfig {
    /// Upper bound for a single compute function invocation.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl EvaluationConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NeighborConfig {
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,
    /// Per-subscriber notification buffer. Messages beyond it are dropped.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            max_neighbors: default_max_neighbors(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: TomlError,
    },
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl CoreConfig {
    /// Load from the default location. A missing file is not an error.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        let config: Self = match toml::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                return Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid { reason });

        if self.kernel.min_rank > self.kernel.max_rank {
            return invalid(format!(
                "kernel.min_rank ({}) exceeds kernel.max_rank ({})",
                self.kernel.min_rank, self.kernel.max_rank
            ));
        }
        if self.evaluation.timeout_ms == 0 {
            return invalid("evaluation.timeout_ms must be positive".to_string());
        }
        if self.neighbors.max_neighbors == 0 {
            return invalid("neighbors.max_neighbors must be positive".to_string());
        }
        if self.neighbors.channel_capacity == 0 {
            return invalid("neighbors.channel_capacity must be positive".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(explicit) = env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(explicit));
    }
    dirs::home_dir().map(|home| home.join(".ringcore").join("config.toml"))
}
