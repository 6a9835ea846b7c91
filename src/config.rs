//! Engine configuration.
//!
//! Values are layered, highest priority first:
//!
//! 1. Environment variables (`GRAPHWRIGHT_*`, sections split on `__`)
//! 2. A TOML file (`graphwright.toml` by default)
//! 3. Built-in defaults

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{GraphError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory of the RocksDB instance.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./graphwright_data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Number of simulated storage partitions that must acknowledge a status change.
    pub partitions: usize,
    /// Delay between two partition acknowledgements.
    pub propagation_delay_ms: u64,
    /// Default deadline for `await_index_status` and for removals waiting on a disable.
    pub await_timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            partitions: 3,
            propagation_delay_ms: 5,
            await_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Create unknown property keys and labels on first use.
    pub auto_create: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self { auto_create: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8182".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub storage: StorageConfig,
    pub index: IndexConfig,
    pub schema: SchemaConfig,
    pub server: ServerConfig,
}

impl GraphConfig {
    /// Defaults with the storage directory pointed at `path`.
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        let mut config = Self::default();
        config.storage.path = path.as_ref().to_path_buf();
        config
    }

    pub fn load() -> Result<Self> {
        Self::load_from_path("graphwright.toml")
    }

    /// Loads defaults, then the TOML file at `path` (if present), then the environment.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GRAPHWRIGHT_").split("__"))
            .extract()
            .map_err(|e| GraphError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str))
            .extract()
            .map_err(|e| GraphError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.index.partitions == 0 {
            return Err(GraphError::Config(
                "index.partitions must be at least 1".to_string(),
            ));
        }
        if self.index.await_timeout_ms == 0 {
            return Err(GraphError::Config(
                "index.await_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_millis(self.index.propagation_delay_ms)
    }

    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.index.await_timeout_ms)
    }
}
