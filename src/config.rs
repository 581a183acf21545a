//! Application configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

/// Default values used when a variable is not set.
pub mod defaults {
    pub const OPENQA_URL: &str = "https://openqa.qubes-os.org";
    pub const SAMPLE_SIZE: usize = 5;
    pub const HISTORY_LEN: usize = 100;
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the openQA instance (API lives under `/api/v1`)
    pub openqa_url: String,
    /// SQLite cache file; `None` keeps the cache in memory for this run
    pub cache_db: Option<PathBuf>,
    /// JSON file mapping distro package names to component names
    pub package_mapping: Option<PathBuf>,
    /// Number of historical jobs sampled by the instability analyzer
    pub sample_size: usize,
    /// Default number of jobs fetched by the investigator
    pub history_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            openqa_url: defaults::OPENQA_URL.to_string(),
            cache_db: None,
            package_mapping: None,
            sample_size: defaults::SAMPLE_SIZE,
            history_len: defaults::HISTORY_LEN,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TRIAGE_OPENQA_URL`: openQA base URL (default: https://openqa.qubes-os.org)
    /// - `TRIAGE_CACHE_DB`: SQLite cache path (default: in-memory)
    /// - `TRIAGE_PACKAGE_MAPPING`: package mapping JSON path (default: empty mapping)
    /// - `TRIAGE_SAMPLE_SIZE`: jobs sampled for instability analysis (default: 5)
    /// - `TRIAGE_HISTORY_LEN`: jobs fetched by `investigate` (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let openqa_url = lookup("TRIAGE_OPENQA_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| defaults::OPENQA_URL.to_string());

        if !openqa_url.starts_with("http://") && !openqa_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "TRIAGE_OPENQA_URL must be an http(s) URL",
            ));
        }

        let cache_db = lookup("TRIAGE_CACHE_DB")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let package_mapping = lookup("TRIAGE_PACKAGE_MAPPING")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let sample_size = lookup("TRIAGE_SAMPLE_SIZE")
            .unwrap_or_else(|| defaults::SAMPLE_SIZE.to_string())
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidValue("TRIAGE_SAMPLE_SIZE must be a valid number"))?;

        if sample_size == 0 {
            return Err(ConfigError::InvalidValue(
                "TRIAGE_SAMPLE_SIZE must be at least 1",
            ));
        }

        let history_len = lookup("TRIAGE_HISTORY_LEN")
            .unwrap_or_else(|| defaults::HISTORY_LEN.to_string())
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidValue("TRIAGE_HISTORY_LEN must be a valid number"))?;

        Ok(Config {
            openqa_url,
            cache_db,
            package_mapping,
            sample_size,
            history_len,
        })
    }

    /// Root of the JSON API.
    pub fn api_url(&self) -> String {
        format!("{}/api/v1", self.openqa_url)
    }

    /// SQLite connection string for the cache.
    pub fn database_url(&self) -> String {
        match &self.cache_db {
            Some(path) => format!("sqlite://{}?mode=rwc", path.display()),
            None => "sqlite::memory:".to_string(),
        }
    }

    /// Check if the cache only lives for this run.
    pub fn is_ephemeral(&self) -> bool {
        self.cache_db.is_none()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(&'static str),
}
