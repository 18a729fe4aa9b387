use std::path::{Component, Path};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::MEMORY_DATA_PATH;

pub const DATA_PATH_ENV_VAR: &str = "GTFS_DATA_PATH";
pub const DEFAULT_DATA_PATH: &str = "./gtfs.db";
const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AppConfig {
    pub data_path: String,
    pub env: Environment,
    pub verbose: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            data_path: DEFAULT_DATA_PATH.to_string(),
            env: Environment::Development,
            verbose: false,
        }
    }
}

impl AppConfig {
    /// Reads a JSON config file. Missing fields take their defaults; an
    /// empty `data-path` is treated as missing.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        log::debug!("Loading configuration from {:?}", path);
        // symlink_metadata so a link to somewhere else is refused too
        let metadata = std::fs::symlink_metadata(path)
            .with_context(|| format!("Failed to stat config file {:?}", path))?;
        if !metadata.file_type().is_file() {
            bail!("Config file {:?} must be a regular file", path);
        }
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            bail!(
                "Config file too large: {} bytes (max: {})",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            );
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let mut config: AppConfig =
            serde_json::from_str(&data).context("Failed to parse JSON config")?;
        if config.data_path.trim().is_empty() {
            config.data_path = DEFAULT_DATA_PATH.to_string();
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Applies `GTFS_DATA_PATH` when it is set and not empty.
    pub fn apply_env_overrides(&mut self) {
        self.apply_data_path_override(std::env::var(DATA_PATH_ENV_VAR).ok());
    }

    fn apply_data_path_override(&mut self, value: Option<String>) {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.data_path = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_data_path(&self.data_path)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}

fn validate_data_path(path: &str) -> Result<()> {
    if path.is_empty() || path == MEMORY_DATA_PATH {
        return Ok(());
    }
    if Path::new(path)
        .components()
        .any(|component| component == Component::ParentDir)
    {
        bail!("data-path {:?} cannot contain '..' path segments", path);
    }
    Ok(())
}
