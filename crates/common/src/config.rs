use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::source::DEFAULT_CHUNK_SIZE;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub processing: ProcessingSettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    /// Object storage; absent unless configured explicitly.
    #[serde(default)]
    pub remote: Option<RemoteSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSettings {
    #[serde(default = "default_data_root")]
    pub root: PathBuf,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

/// Connection parameters for an S3-compatible object store.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSettings {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_window_bytes")]
    pub window_bytes: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("./outputs/metrics.jsonl")
}

fn default_sample_interval_ms() -> u64 {
    100
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_window_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self { chunk_size: default_chunk_size(), delimiter: default_delimiter() }
    }
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { root: default_data_root(), metrics_path: default_metrics_path() }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { sample_interval_ms: default_sample_interval_ms() }
    }
}

impl Settings {
    /// Loads `COLBENCH_CONFIG_PATH` (default `config/default.toml`, optional)
    /// and overlays `COLBENCH__SECTION__KEY` environment variables.
    pub fn new() -> Result<Self> {
        let config_file_path = std::env::var("COLBENCH_CONFIG_PATH")
            .unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load(Some(&config_file_path))
    }

    pub fn load(config_file_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_file_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let s = builder
            .add_source(
                config::Environment::with_prefix("COLBENCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from an inline TOML document, without environment
    /// overrides.
    pub fn from_toml(source: &str) -> Result<Self> {
        let s = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;
        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.processing.chunk_size == 0 {
            return Err(Error::ConfigurationError("processing.chunk_size must be positive".to_string()));
        }
        if self.metrics.sample_interval_ms == 0 {
            return Err(Error::ConfigurationError(
                "metrics.sample_interval_ms must be positive".to_string(),
            ));
        }
        self.processing.delimiter_byte()?;
        Ok(())
    }
}

impl ProcessingSettings {
    /// The configured delimiter as a single byte.
    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(Error::ConfigurationError(format!(
                "delimiter must be a single ASCII character, got `{}`",
                self.delimiter
            ))),
        }
    }
}
