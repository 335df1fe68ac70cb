use driftbox_core::{
    DEFAULT_ID_LENGTH, DEFAULT_RETENTION_WINDOW, DEFAULT_SWEEP_INTERVAL, DriftError,
    RetentionPolicy, Result,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one blob per upload.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// JSON table of file records.
    #[serde(default = "default_metadata_file")]
    pub metadata_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            metadata_file: default_metadata_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_window_seconds")]
    pub retention_window_seconds: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_window_seconds: default_retention_window_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_id_length")]
    pub id_length: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            id_length: default_id_length(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage")
}

fn default_metadata_file() -> PathBuf {
    PathBuf::from("storage.json")
}

fn default_retention_window_seconds() -> u64 {
    DEFAULT_RETENTION_WINDOW.as_secs()
}

fn default_sweep_interval_seconds() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_id_length() -> usize {
    DEFAULT_ID_LENGTH
}

fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

const MIN_ID_LENGTH: usize = 4;
const MAX_ID_LENGTH: usize = 64;

impl Config {
    /// Load from an optional config file, overridden by `DRIFTBOX_*`
    /// environment variables (`__` separates nested keys, e.g.
    /// `DRIFTBOX_STORAGE__STORAGE_DIR`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("DRIFTBOX")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| DriftError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| DriftError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention.retention_window_seconds == 0 {
            return Err(DriftError::Config(
                "retention.retention_window_seconds must be greater than zero".to_string(),
            ));
        }

        if self.retention.sweep_interval_seconds == 0 {
            return Err(DriftError::Config(
                "retention.sweep_interval_seconds must be greater than zero".to_string(),
            ));
        }

        if !(MIN_ID_LENGTH..=MAX_ID_LENGTH).contains(&self.upload.id_length) {
            return Err(DriftError::Config(format!(
                "upload.id_length must be between {} and {}, got {}",
                MIN_ID_LENGTH, MAX_ID_LENGTH, self.upload.id_length
            )));
        }

        if self.upload.max_upload_bytes == 0 {
            return Err(DriftError::Config(
                "upload.max_upload_bytes must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(Duration::from_secs(self.retention.retention_window_seconds))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            storage: StorageConfig::default(),
            retention: RetentionConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}
