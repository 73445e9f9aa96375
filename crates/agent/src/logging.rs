//! Tracing subscriber setup, mirroring the control plane's logger: JSON-
//! or-pretty stdout, optional rotating file output, env-filter driven
//! level.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub struct LoggerGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init(config: &LoggingConfig) -> Result<LoggerGuard> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.level.parse().unwrap_or(tracing::Level::INFO.into()))
        .from_env_lossy();

    let file_guard = if let Some(ref log_dir) = config.log_dir {
        let appender = rolling::daily(log_dir, "meridian-agent.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer().json().with_writer(non_blocking).with_ansi(false);

        match config.format.as_str() {
            "pretty" => {
                let stdout_layer = tracing_subscriber::fmt::layer().pretty();
                tracing_subscriber::registry().with(env_filter).with(file_layer).with(stdout_layer).init();
            }
            _ => {
                let stdout_layer = tracing_subscriber::fmt::layer().json();
                tracing_subscriber::registry().with(env_filter).with(file_layer).with(stdout_layer).init();
            }
        }
        Some(guard)
    } else {
        match config.format.as_str() {
            "pretty" => {
                tracing_subscriber::registry().with(env_filter).with(tracing_subscriber::fmt::layer().pretty()).init();
            }
            _ => {
                tracing_subscriber::registry().with(env_filter).with(tracing_subscriber::fmt::layer().json()).init();
            }
        }
        None
    };

    Ok(LoggerGuard { _file_guard: file_guard })
}
