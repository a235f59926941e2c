//! Configuration management for the wallet harvester.
//!
//! Loaded from an optional TOML file with environment variables (and `.env`)
//! applied on top; missing sections fall back to their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard ceiling on the number of hits a single scroll query may accumulate.
///
/// Queries reporting more hits are abandoned before any page beyond the first
/// is fetched, which bounds the in-memory buffer of a single wallet.
pub const MAX_TOTAL_HITS: u64 = 100_000;

/// Upper bound on the worker pool, whatever the machine or config says.
pub const MAX_WORKERS_CAP: usize = 32;

/// Main harvester configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvesterConfig {
    /// Base URL of the search index (no trailing slash)
    #[serde(default = "default_index_url")]
    pub index_base_url: String,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Scroll pagination settings
    #[serde(default)]
    pub scroll: ScrollConfig,

    /// HTTP transport settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Worker pool settings
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Output directory paths
    #[serde(default)]
    pub paths: PathConfig,

    /// Wallets starting with this prefix are system addresses and never harvested
    #[serde(default = "default_reserved_prefix")]
    pub reserved_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    #[serde(default = "default_calls")]
    pub calls: u32,

    /// Window length (ms)
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
}

impl RateLimitConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls: default_calls(),
            period_ms: default_period_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrollConfig {
    /// Hits per page requested through `size=`
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Server-side cursor lifetime, e.g. "1m"
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            keep_alive: default_keep_alive(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl WorkerConfig {
    /// Pool size actually used, clamped to `[1, MAX_WORKERS_CAP]`
    pub fn effective(&self) -> usize {
        self.max_workers.clamp(1, MAX_WORKERS_CAP)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_ignored_subdir")]
    pub ignored_subdir: String,

    /// Write each run's data artifacts under `<output_dir>/<unix-timestamp>/`
    #[serde(default)]
    pub timestamped_runs: bool,
}

impl PathConfig {
    pub fn ignored_dir(&self) -> PathBuf {
        self.output_dir.join(&self.ignored_subdir)
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            ignored_subdir: default_ignored_subdir(),
            timestamped_runs: false,
        }
    }
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            index_base_url: default_index_url(),
            rate_limits: RateLimitConfig::default(),
            scroll: ScrollConfig::default(),
            http: HttpConfig::default(),
            workers: WorkerConfig::default(),
            paths: PathConfig::default(),
            reserved_prefix: default_reserved_prefix(),
        }
    }
}

// Default value functions
fn default_index_url() -> String {
    "https://index.multiversx.com".to_string()
}

fn default_calls() -> u32 {
    5
}

fn default_period_ms() -> u64 {
    500
}

fn default_page_size() -> u32 {
    10_000
}

fn default_keep_alive() -> String {
    "1m".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_pool_max_idle() -> usize {
    20
}

fn default_max_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + 4).min(MAX_WORKERS_CAP)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("wallets")
}

fn default_ignored_subdir() -> String {
    "ignored".to_string()
}

fn default_reserved_prefix() -> String {
    "erd1qqq".to_string()
}

impl HarvesterConfig {
    /// Load configuration from environment, falling back to defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML config file with environment overrides
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = ::toml::from_str(&contents)?;

        // Environment variables override file settings
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(url) = std::env::var("INDEX_BASE_URL") {
            self.index_base_url = url;
        }
        if let Ok(dir) = std::env::var("HARVEST_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(dir);
        }
        if let Ok(workers) = std::env::var("HARVEST_MAX_WORKERS") {
            self.workers.max_workers = workers
                .parse()
                .map_err(|_| anyhow::anyhow!("HARVEST_MAX_WORKERS is not a number: {}", workers))?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.index_base_url.trim().is_empty() {
            anyhow::bail!("index_base_url must not be empty");
        }
        if self.rate_limits.calls == 0 {
            anyhow::bail!("rate_limits.calls must be > 0");
        }
        if self.rate_limits.period_ms == 0 {
            anyhow::bail!("rate_limits.period_ms must be > 0");
        }
        if self.scroll.page_size == 0 {
            anyhow::bail!("scroll.page_size must be > 0");
        }
        Ok(())
    }

    /// Ensure the output tree exists before a run
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.paths.output_dir)?;
        std::fs::create_dir_all(self.paths.ignored_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_collector_limits() {
        let config = HarvesterConfig::default();
        assert_eq!(config.rate_limits.calls, 5);
        assert_eq!(config.rate_limits.period(), Duration::from_millis(500));
        assert_eq!(config.scroll.page_size, 10_000);
        assert_eq!(config.scroll.keep_alive, "1m");
        assert!(config.workers.effective() <= MAX_WORKERS_CAP);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_clamp() {
        assert_eq!(WorkerConfig { max_workers: 0 }.effective(), 1);
        assert_eq!(WorkerConfig { max_workers: 500 }.effective(), MAX_WORKERS_CAP);
        assert_eq!(WorkerConfig { max_workers: 8 }.effective(), 8);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: HarvesterConfig = ::toml::from_str(
            r#"
            index_base_url = "http://localhost:9200"

            [rate_limits]
            calls = 10

            [paths]
            timestamped_runs = true
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(config.index_base_url, "http://localhost:9200");
        assert_eq!(config.rate_limits.calls, 10);
        assert_eq!(config.rate_limits.period_ms, 500);
        assert!(config.paths.timestamped_runs);
        assert_eq!(config.paths.ignored_dir(), PathBuf::from("wallets/ignored"));
    }

    #[test]
    fn test_validate_rejects_zero_calls() {
        let mut config = HarvesterConfig::default();
        config.rate_limits.calls = 0;
        assert!(config.validate().is_err());
    }
}
