use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use meridian_agent::cli::{Cli, Command};
use meridian_agent::config::ConfigLoader;
use meridian_agent::enrollment::AgentIdentity;
use meridian_agent::executor::WorkflowExecutor;
use meridian_agent::health::HealthMonitor;
use meridian_agent::local_http::LocalRouter;
use meridian_agent::reporter::Reporter;
use meridian_agent::tunnel::TunnelClient;
use meridian_core::SystemClock;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("meridian-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Enroll { installation_key } => enroll(cli.config.as_deref(), &installation_key).await,
        Command::Run => run(cli.config.as_deref()).await,
    }
}

async fn enroll(config_path: Option<&str>, installation_key: &str) -> Result<()> {
    let config = ConfigLoader::load(config_path)?;
    let identity = AgentIdentity::load_or_enroll(&config.agent, installation_key, HashMap::new()).await?;
    println!("enrolled as agent {} (tenant {})", identity.agent_id, identity.tenant_id);
    Ok(())
}

async fn run(config_path: Option<&str>) -> Result<()> {
    let config = ConfigLoader::load(config_path)?;
    let _logger_guard = meridian_agent::logging::init(&config.logging)?;

    let has_identity = config.agent.token.is_some() || std::path::Path::new(&config.agent.state_path).exists();
    let installation_key = std::env::var("MERIDIAN_AGENT_INSTALLATION_KEY").unwrap_or_default();
    if !has_identity && installation_key.is_empty() {
        anyhow::bail!("no persisted agent identity and no MERIDIAN_AGENT_INSTALLATION_KEY set to enrol with");
    }
    let identity = AgentIdentity::load_or_enroll(&config.agent, &installation_key, HashMap::new()).await.context("enrolment failed")?;

    info!(agent_id = %identity.agent_id, tenant_id = %identity.tenant_id, "starting meridian-agent");

    let shutdown = CancellationToken::new();
    let clock = Arc::new(SystemClock);

    let reporter = Reporter::new(reqwest::Client::new(), config.agent.control_base_url.clone(), identity.token.clone(), config.reporter.clone(), shutdown.clone());

    let executor = WorkflowExecutor::new(
        config.executor.max_concurrent,
        reporter,
        clock,
        config.agent.control_base_url.clone(),
        Duration::from_secs(config.executor.shutdown_window_secs),
        Duration::from_secs(config.executor.job_retention_secs),
    );
    executor.spawn_sweeper(Duration::from_secs(config.executor.sweep_interval_secs), shutdown.clone());

    let tunnel_state = Arc::new(meridian_agent::tunnel::TunnelState::default());
    let health = Arc::new(HealthMonitor::new(Arc::clone(&tunnel_state), Arc::clone(&executor)));
    let router = LocalRouter::new(Arc::clone(&executor), health);
    let tunnel = TunnelClient::new(config.tunnel.clone(), identity.tenant_id.to_string(), identity.agent_id.clone(), identity.token.clone(), router, tunnel_state);

    let tunnel_cancel = shutdown.clone();
    let tunnel_handle = tokio::spawn(async move { tunnel.run(tunnel_cancel).await });

    shutdown_signal(shutdown).await;
    let _ = tunnel_handle.await;

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
    cancel.cancel();
}
