//! Monitor configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `TXPULSE_*` environment variables (`__` separates nested keys,
//! e.g. `TXPULSE_RULES__VOLUME__LOW_RATIO=0.25`).

use crate::rules::RuleConfig;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "TXPULSE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Listen address for the API and live channel
    pub listen_addr: String,

    /// Admin HTTP listen address (health checks + metrics)
    pub admin_addr: String,

    /// Storage backend configuration
    pub storage: StorageConfig,

    /// Seconds between scheduled evaluations
    pub scheduler_interval_secs: u64,

    /// Identical findings recorded within this many seconds are suppressed
    pub dedup_window_secs: u64,

    /// Queued live events per subscriber before events are dropped for it
    pub subscriber_queue_capacity: usize,

    /// Fallback window for windowed queries that come back empty
    pub default_window_hours: i64,

    /// JSON-lines files of metric events loaded at startup
    pub seed_files: Vec<PathBuf>,

    /// Optional bearer token required on POST endpoints
    pub auth_token: Option<String>,

    pub log_format: LogFormat,

    pub rules: RuleConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    InMemory,
    File { dir: PathBuf },
    ClickHouse { endpoint: String, database: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            admin_addr: "0.0.0.0:9090".to_string(),
            storage: StorageConfig::InMemory,
            scheduler_interval_secs: 300,
            dedup_window_secs: 60,
            subscriber_queue_capacity: 64,
            default_window_hours: 24,
            seed_files: Vec::new(),
            auth_token: None,
            log_format: LogFormat::Text,
            rules: RuleConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load defaults, then `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&MonitorConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: MonitorConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_socket()?;
        self.admin_socket()?;
        if self.scheduler_interval_secs == 0 {
            bail!("scheduler_interval_secs must be positive");
        }
        if self.subscriber_queue_capacity == 0 {
            bail!("subscriber_queue_capacity must be positive");
        }
        if self.default_window_hours <= 0 {
            bail!("default_window_hours must be positive");
        }
        if self.auth_token.as_deref().map_or(false, str::is_empty) {
            bail!("auth_token must not be empty when set");
        }
        Ok(())
    }

    pub fn listen_socket(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.listen_addr))
    }

    pub fn admin_socket(&self) -> Result<SocketAddr> {
        self.admin_addr
            .parse()
            .with_context(|| format!("Invalid admin address: {}", self.admin_addr))
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}
