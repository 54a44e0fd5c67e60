use crate::constants;
use crate::error::{GranaryError, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the object store (raw/ and normalized/ live under it)
    pub data_root: String,
    /// Directory holding the table registry documents
    #[serde(default = "default_registry_dir")]
    pub registry_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    /// Path of the SQLite warehouse database
    pub db_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Advisory extract validation (column/row checks); logs only, never blocks
    #[serde(default = "default_true")]
    pub validation_enabled: bool,
    /// Correct malformed leading-zero years (0223/03/25 -> 2023-03-25)
    #[serde(default = "default_true")]
    pub zero_year_correction: bool,
    /// When set, an exact-duplicate ratio above this percentage fails the
    /// table instead of being collapsed silently
    #[serde(default)]
    pub max_duplicate_ratio: Option<f64>,
    /// What to do with extract columns absent from the mapping
    #[serde(default)]
    pub unmapped_columns: UnmappedColumns,
    /// First period of the fiscal window (yyyymm) used by range deletes and
    /// full reloads
    #[serde(default = "default_fiscal_start_period")]
    pub fiscal_start_period: String,
    /// First day of the fiscal window (YYYY-MM-DD)
    #[serde(default = "default_fiscal_start_date")]
    pub fiscal_start_date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedColumns {
    Keep,
    Drop,
}

impl Default for UnmappedColumns {
    fn default() -> Self {
        UnmappedColumns::Keep
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            validation_enabled: true,
            zero_year_correction: true,
            max_duplicate_ratio: None,
            unmapped_columns: UnmappedColumns::Keep,
            fiscal_start_period: default_fiscal_start_period(),
            fiscal_start_date: default_fiscal_start_date(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_registry_dir() -> String {
    "registry".to_string()
}

fn default_fiscal_start_period() -> String {
    constants::DEFAULT_FISCAL_START_PERIOD.to_string()
}

fn default_fiscal_start_date() -> String {
    constants::DEFAULT_FISCAL_START_DATE.to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from(config_path: &str) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            GranaryError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path, e
            ))
        })?;

        let mut config: Config = toml::from_str(&config_content)?;

        // Environment overrides for deployment paths
        if let Ok(root) = std::env::var("GRANARY_DATA_ROOT") {
            config.storage.data_root = root;
        }
        if let Ok(dir) = std::env::var("GRANARY_REGISTRY_DIR") {
            config.storage.registry_dir = dir;
        }
        if let Ok(db) = std::env::var("GRANARY_DB_PATH") {
            config.warehouse.db_path = db;
        }

        Ok(config)
    }
}
