//! Configuration structures for the ingestion pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::input::Mode;

/// Main configuration for the nfe pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NfeConfig {
    /// Relational storage configuration.
    pub storage: StorageConfig,

    /// Processing cache configuration.
    pub cache: CacheConfig,

    /// Ingestion behaviour.
    pub ingest: IngestConfig,
}

/// Relational storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data").join("main.sqlite"),
        }
    }
}

/// Processing cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding one file per cache partition.
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("cache"),
        }
    }
}

/// Ingestion behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Mode used when the command line does not pick one.
    pub default_mode: Mode,

    /// Skip inputs already recorded as failures when scanning a directory.
    pub skip_cached_failures: bool,

    /// Log a warning whenever a missing total is recorded as zero.
    pub warn_on_defaulted_totals: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_mode: Mode::FactOnly,
            skip_cached_failures: true,
            warn_on_defaulted_totals: true,
        }
    }
}

impl NfeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }
}
