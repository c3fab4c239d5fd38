//! Configuration management for querydesk.
//!
//! Loads executor, cache and named-connection settings from a TOML file, with
//! PG* environment variables filling gaps in PostgreSQL connections.

use crate::cache::DEFAULT_MAX_SIZE_BYTES;
use crate::connection::ConnectionDescriptor;
use crate::error::{QueryDeskError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Named connections, keyed by registry id.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionDescriptor>,
}

/// Async executor settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Upper bound on queries executing at once. Unbounded when absent.
    #[serde(default)]
    pub max_concurrent_queries: Option<usize>,
}

/// Result cache settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Capacity in estimated bytes.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,
}

fn default_max_size_bytes() -> usize {
    DEFAULT_MAX_SIZE_BYTES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("querydesk")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file. A missing file yields defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| QueryDeskError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(|e| {
            QueryDeskError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })?;
        config.normalize();
        Ok(config)
    }

    /// Fills descriptor ids from their table keys.
    fn normalize(&mut self) {
        for (id, descriptor) in &mut self.connections {
            descriptor.id = id.clone();
            if descriptor.name.is_empty() {
                descriptor.name = id.clone();
            }
        }
    }

    /// Gets a named connection with environment defaults applied, or the
    /// `default` connection if `name` is None.
    pub fn get_connection(&self, name: Option<&str>) -> Option<ConnectionDescriptor> {
        let key = name.unwrap_or("default");
        self.connections.get(key).map(|descriptor| {
            let mut descriptor = descriptor.clone();
            descriptor.id = key.to_string();
            descriptor.apply_env_defaults();
            descriptor
        })
    }

    /// All configured connections, sorted by id, with environment defaults
    /// applied.
    pub fn descriptors(&self) -> Vec<ConnectionDescriptor> {
        let mut ids: Vec<&String> = self.connections.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.get_connection(Some(id)))
            .collect()
    }
}
