//! Layered configuration for `meridian-control`, loaded the way the
//! teacher's `ConfigLoader` does: programmatic defaults, then a project
//! YAML file, then environment variables, highest priority last.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server.bind_addr must not be empty")]
    EmptyBindAddr,
    #[error("database.path must not be empty")]
    EmptyDatabasePath,
    #[error("auth.jwt_secret must be at least 16 bytes")]
    WeakJwtSecret,
    #[error("logging.level {0} is not one of trace, debug, info, warn, error")]
    InvalidLogLevel(String),
    #[error("campaign.tick_interval_secs must be >= 1")]
    InvalidTickInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub quickwit: QuickwitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub campaign: CampaignConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            quickwit: QuickwitConfig::default(),
            logging: LoggingConfig::default(),
            campaign: CampaignConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_heartbeat_threshold_secs")]
    pub heartbeat_threshold_secs: i64,
    #[serde(default = "default_sweep_interval_secs")]
    pub offline_sweep_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8443".to_string()
}

const fn default_heartbeat_threshold_secs() -> i64 {
    30
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            heartbeat_threshold_secs: default_heartbeat_threshold_secs(),
            offline_sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".meridian/control.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_agent_token_ttl_days")]
    pub agent_token_ttl_days: i64,
}

fn default_jwt_secret() -> String {
    "development-only-secret-change-me".to_string()
}

const fn default_agent_token_ttl_days() -> i64 {
    365
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            agent_token_ttl_days: default_agent_token_ttl_days(),
        }
    }
}

/// Audit events are streamed to an external append-only sink with a
/// search API (spec §6) — Quickwit is the pack's reference
/// implementation for that role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QuickwitConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_index_id")]
    pub index_id: String,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_index_id() -> String {
    "meridian-audit".to_string()
}

const fn default_flush_interval_secs() -> u64 {
    5
}

impl Default for QuickwitConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            index_id: default_index_id(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CampaignConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_dispatch_attempts")]
    pub default_dispatch_attempts: u32,
    #[serde(default = "default_rollback_min_samples")]
    pub default_rollback_min_samples: u32,
}

const fn default_tick_interval_secs() -> u64 {
    5
}

const fn default_dispatch_attempts() -> u32 {
    3
}

const fn default_rollback_min_samples() -> u32 {
    5
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            default_dispatch_attempts: default_dispatch_attempts(),
            default_rollback_min_samples: default_rollback_min_samples(),
        }
    }
}

/// The reverse-tunnel fabric the dispatch client posts workflow
/// invocations through (spec §4.2, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DispatchConfig {
    #[serde(default = "default_fabric_base_url")]
    pub fabric_base_url: String,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_reconcile_grace_secs")]
    pub reconcile_grace_secs: i64,
}

fn default_fabric_base_url() -> String {
    "http://127.0.0.1:9090".to_string()
}

const fn default_attempt_timeout_secs() -> u64 {
    30
}

const fn default_backoff_initial_ms() -> u64 {
    1_000
}

const fn default_backoff_max_ms() -> u64 {
    60_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_reconcile_grace_secs() -> i64 {
    60
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            fabric_base_url: default_fabric_base_url(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            reconcile_grace_secs: default_reconcile_grace_secs(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest): programmatic defaults, `--config`
    /// file, `MERIDIAN_*` environment variables (spec §6 CLI surface).
    pub fn load(config_path: Option<&str>) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed("MERIDIAN_").split("__"))
            .extract()
            .context("failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> std::result::Result<(), ConfigError> {
        if config.server.bind_addr.trim().is_empty() {
            return Err(ConfigError::EmptyBindAddr);
        }
        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.auth.jwt_secret.len() < 16 {
            return Err(ConfigError::WeakJwtSecret);
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if config.campaign.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidTickInterval);
        }
        Ok(())
    }
}
