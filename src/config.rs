//! Configuration management for PaperScope
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with PAPERSCOPE__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use chrono::Utc;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunker::ChunkingConfig;
use crate::errors::Result;
use crate::telemetry::{CostTracker, PricingTable};

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Generation defaults passed to providers
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Retry / rate-limit behaviour of the model client
    #[serde(default)]
    pub retry: RetryConfig,

    /// Text chunking parameters
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Context retrieval parameters
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Path to a JSON pricing table (model -> per-1k token costs)
    pub pricing_path: Option<String>,

    /// Telemetry output locations
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum completion tokens (None lets the provider default apply)
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum attempts per logical call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Minimum interval between requests on one client in milliseconds
    #[serde(default = "default_min_interval_ms")]
    pub min_request_interval_ms: u64,

    /// Per-attempt provider timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Number of nearest chunks to request per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Maximum token count for an assembled context
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Word decrement applied per trimming step
    #[serde(default = "default_trim_step")]
    pub trim_step_words: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Directory for metrics output files
    #[serde(default = "default_metrics_dir")]
    pub metrics_dir: String,

    /// Directory for cost output files
    #[serde(default = "default_costs_dir")]
    pub costs_dir: String,

    /// Directory for analysis reports
    #[serde(default = "default_analysis_dir")]
    pub analysis_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,
}

// Default value functions
fn default_temperature() -> f64 { 0.7 }
fn default_max_retries() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 1000 }
fn default_min_interval_ms() -> u64 { 500 }
fn default_request_timeout() -> u64 { 60 }
fn default_top_k() -> usize { 5 }
fn default_token_budget() -> usize { 4000 }
fn default_trim_step() -> usize { 50 }
fn default_metrics_dir() -> String { "data/metrics".to_string() }
fn default_costs_dir() -> String { "data/costs".to_string() }
fn default_analysis_dir() -> String { "data/analysis".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            min_request_interval_ms: default_min_interval_ms(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            token_budget: default_token_budget(),
            trim_step_words: default_trim_step(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_dir: default_metrics_dir(),
            costs_dir: default_costs_dir(),
            analysis_dir: default_analysis_dir(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            generation: GenerationConfig::default(),
            retry: RetryConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            pricing_path: None,
            telemetry: TelemetryConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let env = std::env::var("PAPERSCOPE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with PAPERSCOPE__ prefix
            // e.g., PAPERSCOPE__RETRY__MAX_RETRIES=5
            .add_source(
                Environment::with_prefix("PAPERSCOPE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("PAPERSCOPE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Per-attempt provider timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.retry.request_timeout_secs)
    }

    /// Minimum interval between requests as a Duration
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.retry.min_request_interval_ms)
    }

    /// Pricing table from `pricing_path`, or the built-in defaults
    pub fn pricing_table(&self) -> Result<PricingTable> {
        match &self.pricing_path {
            Some(path) => PricingTable::from_path(path),
            None => Ok(PricingTable::default()),
        }
    }

    /// Cost tracker priced per this configuration
    pub fn cost_tracker(&self) -> Result<CostTracker> {
        Ok(CostTracker::new(self.pricing_table()?))
    }
}

impl TelemetryConfig {
    /// Timestamped output path for a metrics save
    pub fn metrics_path(&self) -> PathBuf {
        timestamped_path(&self.metrics_dir, "performance_metrics")
    }

    /// Timestamped output path for a cost save
    pub fn costs_path(&self) -> PathBuf {
        timestamped_path(&self.costs_dir, "cost_records")
    }

    /// Timestamped output path for an analysis report
    pub fn analysis_path(&self) -> PathBuf {
        timestamped_path(&self.analysis_dir, "performance_report")
    }
}

fn timestamped_path(dir: &str, prefix: &str) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    Path::new(dir).join(format!("{}_{}.json", prefix, stamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.min_request_interval_ms, 500);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.chunking.chunk_size, 1000);
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::default();
        assert_eq!(config.min_request_interval(), Duration::from_millis(500));
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_cost_tracker_from_pricing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricing.json");
        std::fs::write(&path, r#"{"house-model": {"input": 0.01, "output": 0.02}}"#).unwrap();

        let config = AppConfig {
            pricing_path: Some(path.to_string_lossy().into_owned()),
            ..AppConfig::default()
        };
        let tracker = config.cost_tracker().unwrap();
        assert!((tracker.calculate_cost("house-model", 1000, 1000) - 0.03).abs() < 1e-12);

        // No path falls back to the built-in table
        let tracker = AppConfig::default().cost_tracker().unwrap();
        assert!(tracker.calculate_cost("gpt-4", 1000, 0) > 0.0);
    }

    #[test]
    fn test_telemetry_paths_land_in_configured_dirs() {
        let config = TelemetryConfig {
            metrics_dir: "out/m".to_string(),
            costs_dir: "out/c".to_string(),
            analysis_dir: "out/a".to_string(),
        };

        assert!(config.metrics_path().starts_with("out/m"));
        assert!(config.costs_path().starts_with("out/c"));
        assert!(config.analysis_path().starts_with("out/a"));
        let name = config.metrics_path();
        let name = name.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("performance_metrics_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_trackers_save_into_configured_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = TelemetryConfig {
            metrics_dir: dir.path().join("metrics").to_string_lossy().into_owned(),
            costs_dir: dir.path().join("costs").to_string_lossy().into_owned(),
            analysis_dir: dir.path().join("analysis").to_string_lossy().into_owned(),
        };
        std::fs::create_dir_all(&config.metrics_dir).unwrap();
        std::fs::create_dir_all(&config.costs_dir).unwrap();

        let metrics = crate::telemetry::MetricsTracker::new();
        metrics.save(config.metrics_path()).unwrap();

        let costs = CostTracker::default();
        costs.save(config.costs_path()).unwrap();

        assert_eq!(std::fs::read_dir(&config.metrics_dir).unwrap().count(), 1);
        assert_eq!(std::fs::read_dir(&config.costs_dir).unwrap().count(), 1);
    }
}
