use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::Parser;
use meridian_control::audit::BatchedAuditSink;
use meridian_control::cli::{Cli, Command};
use meridian_control::config::ConfigLoader;
use meridian_control::db;
use meridian_control::http::{build_router, AppState};
use meridian_control::services::{CampaignEngine, EnrollmentService, RegistryService, TenantService, WorkflowService};
use meridian_core::jwt::JwtCodec;
use meridian_core::SystemClock;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("meridian-control {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Migrate => {
            let config = ConfigLoader::load(cli.config.as_deref())?;
            let pool = db::create_pool(&config.database.path, config.database.max_connections).await.context("failed to open database")?;
            db::migrate(&pool).await.context("failed to apply schema")?;
            println!("schema applied");
            Ok(())
        }
        Command::Mcp => {
            anyhow::bail!("mcp surface is out of scope for this build");
        }
        Command::Serve => serve(cli.config.as_deref()).await,
    }
}

async fn serve(config_path: Option<&str>) -> Result<()> {
    let config = ConfigLoader::load(config_path)?;
    let _logger_guard = meridian_control::logging::init(&config.logging)?;

    info!(bind_addr = %config.server.bind_addr, "starting meridian-control");

    let pool = db::create_pool(&config.database.path, config.database.max_connections).await.context("failed to open database")?;
    db::migrate(&pool).await.context("failed to apply schema")?;

    let clock = Arc::new(SystemClock);
    let jwt = Arc::new(JwtCodec::new(config.auth.jwt_secret.as_bytes()));

    let audit_sink = Arc::new(BatchedAuditSink::new(config.quickwit.clone()));
    let audit: Arc<dyn meridian_core::ports::AuditSink> = audit_sink.clone();
    let shutdown = CancellationToken::new();
    audit_sink.spawn_flusher(shutdown.clone());

    let tenants_repo = Arc::new(db::tenant_repository::SqliteTenantRepository::new(pool.clone()));
    let agents_repo = Arc::new(db::agent_repository::SqliteAgentRepository::new(pool.clone()));
    let agent_tokens_repo = Arc::new(db::agent_token_repository::SqliteAgentTokenRepository::new(pool.clone()));
    let keys_repo = Arc::new(db::installation_key_repository::SqliteInstallationKeyRepository::new(pool.clone()));
    let workflows_repo = Arc::new(db::workflow_repository::SqliteWorkflowRepository::new(pool.clone()));
    let campaigns_repo = Arc::new(db::campaign_repository::SqliteCampaignRepository::new(pool.clone()));
    let phases_repo = Arc::new(db::campaign_repository::SqliteCampaignPhaseRepository::new(pool.clone()));
    let executions_repo = Arc::new(db::execution_repository::SqliteExecutionRepository::new(pool.clone()));

    let tenants = Arc::new(TenantService::new(tenants_repo));
    let registry = Arc::new(RegistryService::new(
        Arc::clone(&agents_repo) as Arc<dyn meridian_core::ports::AgentRepository>,
        Arc::clone(&executions_repo) as Arc<dyn meridian_core::ports::ExecutionRepository>,
        Arc::clone(&audit),
        Arc::clone(&clock) as Arc<dyn meridian_core::Clock>,
        Duration::seconds(config.server.heartbeat_threshold_secs),
    ));
    let workflows = Arc::new(WorkflowService::new(workflows_repo, Arc::clone(&tenants)));
    let enrollment = Arc::new(EnrollmentService::new(
        keys_repo,
        Arc::clone(&agents_repo) as Arc<dyn meridian_core::ports::AgentRepository>,
        agent_tokens_repo,
        Arc::clone(&tenants),
        Arc::clone(&jwt),
        Arc::clone(&clock) as Arc<dyn meridian_core::Clock>,
        Duration::days(config.auth.agent_token_ttl_days),
    ));
    let dispatch = Arc::new(meridian_control::services::DispatchClient::new(
        executions_repo.clone(),
        phases_repo.clone(),
        Arc::clone(&audit),
        config.dispatch.clone(),
        config.campaign.default_dispatch_attempts,
    ));
    let campaigns = Arc::new(CampaignEngine::new(
        campaigns_repo,
        phases_repo,
        executions_repo,
        agents_repo as Arc<dyn meridian_core::ports::AgentRepository>,
        Arc::clone(&workflows),
        Arc::clone(&tenants),
        Arc::clone(&dispatch),
        Arc::clone(&audit),
        Arc::clone(&clock) as Arc<dyn meridian_core::Clock>,
        config.campaign.default_rollback_min_samples,
    ));

    campaigns.spawn_tick_loop(StdDuration::from_secs(config.campaign.tick_interval_secs), shutdown.clone());
    registry.spawn_sweeper(StdDuration::from_secs(config.server.offline_sweep_interval_secs), shutdown.clone());

    let state = Arc::new(AppState { jwt, tenants, registry, workflows, campaigns, enrollment, dispatch });
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await.context("failed to bind listener")?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(shutdown)).await.context("server error")?;

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
    cancel.cancel();
}
