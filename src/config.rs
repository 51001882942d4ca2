use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::fetcher::DEFAULT_BASE_URL;

/// Fatal configuration problems, raised before any network activity
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    InvalidVar { key: &'static str, value: String },

    #[error("Required input file not found: {path}")]
    MissingInput { path: PathBuf },

    #[error("Invalid input file {path}: {message}")]
    InvalidInput { path: PathBuf, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub data_dir: PathBuf,
    pub inventory_path: PathBuf,
    pub locations_path: PathBuf,
    pub provinces: Vec<String>,
    pub concurrency: usize,
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub retry_attempts: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            base_url: env::var("CLIMATE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            data_dir: env::var("CLIMATE_DATA_DIR")
                .unwrap_or_else(|_| "climate_data".to_string())
                .into(),
            inventory_path: env::var("STATION_INVENTORY")
                .unwrap_or_else(|_| "Station Inventory EN.csv".to_string())
                .into(),
            locations_path: env::var("LOCATIONS_JSON")
                .unwrap_or_else(|_| "locations.json".to_string())
                .into(),
            provinces: parse_provinces(
                &env::var("PROVINCES").unwrap_or_else(|_| "NL,NS,PEI,NB,QC".to_string()),
            ),
            concurrency: parse_var("UPDATE_CONCURRENCY", 8usize)?.max(1),
            request_delay_ms: parse_var("REQUEST_DELAY_MS", 100)?,
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", 60)?,
            retry_attempts: parse_var("FETCH_RETRY_ATTEMPTS", 2)?,
        })
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Fail with `MissingInput` unless `path` is an existing file
pub fn require_file(path: &Path) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::MissingInput {
            path: path.to_path_buf(),
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidVar { key, value }),
        Err(_) => Ok(default),
    }
}

fn parse_provinces(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|p| p.trim().to_uppercase())
        .filter(|p| !p.is_empty())
        .collect()
}
