use crate::error::IndexerError;
use crate::key_parser::ParseTimezone;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the recording indexer
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Object store configuration
    pub s3: S3Config,
    /// Catalog database configuration
    pub database: DatabaseConfig,
    /// Segment naming configuration
    #[serde(default)]
    pub segments: SegmentConfig,
    /// Reconciliation scan configuration
    #[serde(default)]
    pub scan: ScanConfig,
    /// Push ingest API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Expose Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Object store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding archived segments
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Static access key; falls back to the default credential chain
    pub access_key_id: Option<String>,
    /// Static secret key
    pub secret_access_key: Option<String>,
    /// Create the bucket at startup if it does not exist
    #[serde(default = "default_true")]
    pub create_bucket_if_missing: bool,
    /// Keys per listing page
    #[serde(default = "default_page_size")]
    pub page_size: i32,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// Segment naming configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentConfig {
    /// Fixed segment length in seconds; must match the recorder's segment time
    #[serde(default = "default_segment_duration_secs")]
    pub duration_secs: u64,
    /// Timezone of the timestamps embedded in keys: "local", "utc" or "+07:00"
    #[serde(default)]
    pub timezone: ParseTimezone,
}

/// Reconciliation scan configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Seconds between scan passes
    #[serde(default = "default_scan_interval_secs")]
    pub interval_secs: u64,
    /// Timeout for one listing page fetch, in seconds
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    /// Timeout for one catalog upsert, in seconds
    #[serde(default = "default_upsert_timeout_secs")]
    pub upsert_timeout_secs: u64,
    /// Unrecognized keys logged individually per pass
    #[serde(default = "default_unrecognized_log_limit")]
    pub unrecognized_log_limit: u64,
}

/// Push ingest API configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    /// Listen address, e.g. "0.0.0.0:8090"; push ingest is disabled when unset
    pub listen_addr: Option<String>,
}

// Default value functions
fn default_service_name() -> String {
    "recording-indexer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_page_size() -> i32 {
    1000
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_segment_duration_secs() -> u64 {
    3600
}

fn default_scan_interval_secs() -> u64 {
    30
}

fn default_page_timeout_secs() -> u64 {
    30
}

fn default_upsert_timeout_secs() -> u64 {
    10
}

fn default_unrecognized_log_limit() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from config files and environment, then validate it
    pub fn load() -> Result<Self, IndexerError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/recording-indexer").required(false))
            .add_source(config::File::with_name("/etc/cctv/recording-indexer").required(false))
            .add_source(Self::environment());

        Self::from_builder(builder)
    }

    /// INDEXER__S3__BUCKET -> s3.bucket
    ///
    /// Values stay strings; numeric and boolean fields are coerced during
    /// deserialization, and `+0700` must reach the timezone parser intact.
    fn environment() -> config::Environment {
        config::Environment::with_prefix("INDEXER").separator("__")
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, IndexerError> {
        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the indexer cannot run with
    pub fn validate(&self) -> Result<(), IndexerError> {
        let required = [("s3.bucket", &self.s3.bucket), ("database.url", &self.database.url)];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(IndexerError::Config(format!("{name} must be set")));
            }
        }

        let positive = [
            ("segments.duration_secs", self.segments.duration_secs),
            ("scan.interval_secs", self.scan.interval_secs),
            ("scan.page_timeout_secs", self.scan.page_timeout_secs),
            ("scan.upsert_timeout_secs", self.scan.upsert_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(IndexerError::Config(format!("{name} must be greater than zero")));
            }
        }

        if !(1..=1000).contains(&self.s3.page_size) {
            return Err(IndexerError::Config(
                "s3.page_size must be between 1 and 1000".to_string(),
            ));
        }

        Ok(())
    }

    /// Get segment duration as Duration
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segments.duration_secs)
    }

    /// Get scan interval as Duration
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan.interval_secs)
    }

    /// Get listing page timeout as Duration
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.scan.page_timeout_secs)
    }

    /// Get upsert timeout as Duration
    pub fn upsert_timeout(&self) -> Duration {
        Duration::from_secs(self.scan.upsert_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_enabled: true,
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_segment_duration_secs(),
            timezone: ParseTimezone::default(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_scan_interval_secs(),
            page_timeout_secs: default_page_timeout_secs(),
            upsert_timeout_secs: default_upsert_timeout_secs(),
            unrecognized_log_limit: default_unrecognized_log_limit(),
        }
    }
}
