use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Main configuration for the indexer
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Backfill configuration
    #[serde(default)]
    pub backfill: BackfillConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding the images and their folder indexes
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Upper bound for any single store request, in seconds
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

/// Backfill run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackfillConfig {
    /// Only keys starting with this prefix are scanned
    #[serde(default)]
    pub prefix: String,
    /// Number of objects per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Parallel workers within a batch (defaults to the batch size)
    pub concurrency: Option<usize>,
    /// Bytes requested by the ranged header fetch
    #[serde(default = "default_header_bytes")]
    pub header_bytes: u64,
    /// Compute everything but write nothing
    #[serde(default)]
    pub dry_run: bool,
    /// Skip thumbnail-like filenames
    #[serde(default = "default_true")]
    pub skip_thumbnails: bool,
    /// Case-insensitive filename fragments that mark a thumbnail
    #[serde(default = "default_thumbnail_markers")]
    pub thumbnail_markers: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "exif-indexer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_operation_timeout_secs() -> u64 {
    5
}

fn default_batch_size() -> usize {
    5
}

fn default_header_bytes() -> u64 {
    64 * 1024 // 64KB
}

fn default_true() -> bool {
    true
}

pub fn default_thumbnail_markers() -> Vec<String> {
    ["_thumb", "-thumb", "thumbnail", "_small", "_medium"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, optionally layering an explicit file on top of the defaults
    pub fn load_from(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with default values
            .set_default("service.name", "exif-indexer")?
            .set_default("service.log_level", "info")?
            .set_default("s3.region", "us-east-1")?
            // Add config file if present
            .add_source(config::File::with_name("config/indexer").required(false))
            .add_source(config::File::with_name("/etc/exif-indexer/indexer").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            // Override with environment variables
            // INDEXER__S3__ENDPOINT_URL -> s3.endpoint_url
            .add_source(
                config::Environment::with_prefix("INDEXER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check values that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("s3.bucket".to_string()));
        }
        if self.backfill.batch_size == 0 {
            return Err(invalid("backfill.batch_size", "must be at least 1"));
        }
        if self.backfill.concurrency == Some(0) {
            return Err(invalid("backfill.concurrency", "must be at least 1"));
        }
        if self.backfill.header_bytes == 0 {
            return Err(invalid("backfill.header_bytes", "must be at least 1"));
        }
        if self.s3.operation_timeout_secs == 0 {
            return Err(invalid("s3.operation_timeout_secs", "must be at least 1"));
        }
        Ok(())
    }

    /// Get per-request store timeout as Duration
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.s3.operation_timeout_secs)
    }
}

impl BackfillConfig {
    /// Effective parallelism inside a batch
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.unwrap_or(self.batch_size).max(1)
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            batch_size: default_batch_size(),
            concurrency: None,
            header_bytes: default_header_bytes(),
            dry_run: false,
            skip_thumbnails: true,
            thumbnail_markers: default_thumbnail_markers(),
        }
    }
}
