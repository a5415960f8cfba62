// ABOUTME: Application configuration for Schema Lens
// ABOUTME: Remembers recent project directories and connector/store settings as JSON

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::connect::ConnectOptions;

const MAX_RECENT_PROJECTS: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub last_project: Option<PathBuf>,
    /// Most recent first
    #[serde(default)]
    pub recent_projects: Vec<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_store_file_name")]
    pub store_file_name: String,
}

fn default_version() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_store_file_name() -> String {
    "relation.db".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            last_project: None,
            recent_projects: Vec::new(),
            connect_timeout_secs: default_connect_timeout(),
            store_file_name: default_store_file_name(),
        }
    }
}

impl AppConfig {
    /// Get the config file path based on OS
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirFound)?;
        Ok(config_dir.join("Schema Lens").join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;

        if !path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = fs::read_to_string(&path)?;
        let config: AppConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        Ok(())
    }

    /// Make `dir` the last project and move it to the front of the recent list
    pub fn remember_project(&mut self, dir: &Path) {
        self.recent_projects.retain(|p| p != dir);
        self.recent_projects.insert(0, dir.to_path_buf());
        self.recent_projects.truncate(MAX_RECENT_PROJECTS);
        self.last_project = Some(dir.to_path_buf());
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
        }
    }
}
