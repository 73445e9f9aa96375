//! Layered configuration for `meridian-agent`, loaded the same way as
//! the control plane's `ConfigLoader`: programmatic defaults, then a
//! project YAML file, then environment variables, highest priority last.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("agent.tenant_id must not be empty")]
    EmptyTenantId,
    #[error("tunnel.fabric_url must not be empty")]
    EmptyFabricUrl,
    #[error("executor.max_concurrent must be >= 1")]
    InvalidMaxConcurrent,
    #[error("logging.level {0} is not one of trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    #[serde(default)]
    pub agent: AgentIdentityConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub reporter: ReporterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentIdentityConfig::default(),
            tunnel: TunnelConfig::default(),
            executor: ExecutorConfig::default(),
            reporter: ReporterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Identity assigned at enrolment time (spec §4.5); persisted locally so
/// restarts reconnect under the same agent id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentIdentityConfig {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_control_base_url")]
    pub control_base_url: String,
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

fn default_control_base_url() -> String {
    "http://127.0.0.1:8443".to_string()
}

fn default_state_path() -> String {
    ".meridian-agent/state.json".to_string()
}

impl Default for AgentIdentityConfig {
    fn default() -> Self {
        Self { agent_id: None, tenant_id: None, token: None, control_base_url: default_control_base_url(), state_path: default_state_path() }
    }
}

/// Reverse tunnel client settings (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TunnelConfig {
    #[serde(default = "default_fabric_url")]
    pub fabric_url: String,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_fabric_url() -> String {
    "ws://127.0.0.1:9090".to_string()
}

const fn default_handshake_timeout_secs() -> u64 {
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

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            fabric_url: default_fabric_url(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Workflow executor settings (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_shutdown_window_secs")]
    pub shutdown_window_secs: u64,
    #[serde(default = "default_retention_secs")]
    pub job_retention_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

const fn default_max_concurrent() -> usize {
    5
}

const fn default_shutdown_window_secs() -> u64 {
    30
}

const fn default_retention_secs() -> u64 {
    3600
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            shutdown_window_secs: default_shutdown_window_secs(),
            job_retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Terminal-report delivery to the control plane. A terminal report
/// must not be lost (spec §7), so delivery retries indefinitely with
/// capped exponential backoff rather than bounding attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReporterConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

const fn default_queue_capacity() -> usize {
    256
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
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
        Self { level: default_log_level(), format: default_log_format(), log_dir: None }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Precedence (lowest to highest): programmatic defaults, `--config`
    /// file, `MERIDIAN_AGENT_*` environment variables.
    pub fn load(config_path: Option<&str>) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment.merge(Env::prefixed("MERIDIAN_AGENT_").split("__")).extract().context("failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> std::result::Result<(), ConfigError> {
        if config.tunnel.fabric_url.trim().is_empty() {
            return Err(ConfigError::EmptyFabricUrl);
        }
        if config.executor.max_concurrent == 0 {
            return Err(ConfigError::InvalidMaxConcurrent);
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        if let Some(tenant_id) = config.agent.tenant_id.as_ref() {
            if tenant_id.trim().is_empty() {
                return Err(ConfigError::EmptyTenantId);
            }
        }
        Ok(())
    }
}
