use crate::constants;
use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bucket")]
    pub bucket_name: String,
    #[serde(default = "default_table")]
    pub table_name: String,
    #[serde(default = "constants::default_sites")]
    pub sites: Vec<String>,
    #[serde(default)]
    pub uploader: UploaderConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploaderConfig {
    /// Minutes between batch uploads.
    pub interval_minutes: u64,
    /// Stop after this many uploads; unlimited when absent.
    pub max_uploads: Option<u32>,
    /// Probability of injecting a negative-value anomaly per record.
    pub anomaly_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
}

fn default_bucket() -> String {
    "energy-data".to_string()
}

fn default_table() -> String {
    "energy-data".to_string()
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
            max_uploads: Some(12),
            anomaly_rate: 0.02,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8000 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bucket_name: default_bucket(),
            table_name: default_table(),
            sites: constants::default_sites(),
            uploader: UploaderConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {e}",
                config_path.display()
            ))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }

    /// Load `config.toml`, falling back to defaults when it is absent.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default configuration: {e}");
                Config::default()
            }
        }
    }
}
