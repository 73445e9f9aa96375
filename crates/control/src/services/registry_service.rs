//! Agent registry: liveness lookups plus the offline sweeper referenced
//! in spec §2 and §5.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use meridian_core::models::{Agent, AgentStatus, ExecutionResult, ExecutionStatus};
use meridian_core::ports::{AgentRepository, AuditSink, ExecutionRepository};
use meridian_core::{Clock, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub struct RegistryService {
    agents: Arc<dyn AgentRepository>,
    executions: Arc<dyn ExecutionRepository>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    heartbeat_threshold: Duration,
}

impl RegistryService {
    pub fn new(agents: Arc<dyn AgentRepository>, executions: Arc<dyn ExecutionRepository>, audit: Arc<dyn AuditSink>, clock: Arc<dyn Clock>, heartbeat_threshold: Duration) -> Self {
        Self { agents, executions, audit, clock, heartbeat_threshold }
    }

    /// Deregisters an agent (spec §4.1 edge case): any execution still
    /// `{pending, running}` against it is cancelled with reason "agent
    /// unavailable" before the row is deleted, so nothing is left
    /// waiting on an agent that can no longer be dispatched to. Once
    /// deleted, `list_matching` no longer returns it, so it can never
    /// become a cohort candidate again.
    pub async fn deregister(&self, tenant_id: Uuid, id: &str) -> Result<()> {
        let pending = self.executions.list_non_terminal_for_agent(tenant_id, id).await?;
        for execution in pending {
            let result = ExecutionResult { steps: vec![], error: Some("agent unavailable".into()) };
            if let Err(err) = self.executions.mark_terminal(execution.id, ExecutionStatus::Cancelled, Some(result)).await {
                warn!(execution_id = %execution.id, error = %err, "failed to cancel execution during agent deregistration");
            }
        }
        self.agents.delete(tenant_id, id).await?;
        self.audit.record(deregister_event(tenant_id, id, self.clock.now())).await;
        Ok(())
    }

    pub async fn get(&self, tenant_id: Uuid, id: &str) -> Result<Option<(Agent, AgentStatus)>> {
        let agent = self.agents.get(tenant_id, id).await?;
        Ok(agent.map(|a| {
            let status = a.derive_status(self.clock.now(), self.heartbeat_threshold);
            (a, status)
        }))
    }

    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<(Agent, AgentStatus)>> {
        let now = self.clock.now();
        let agents = self.agents.list(tenant_id).await?;
        Ok(agents.into_iter().map(|a| { let s = a.derive_status(now, self.heartbeat_threshold); (a, s) }).collect())
    }

    pub async fn heartbeat(&self, tenant_id: Uuid, id: &str) -> Result<()> {
        self.agents.update_last_seen(tenant_id, id, self.clock.now()).await
    }

    /// Offline beyond `3x` the heartbeat threshold (see
    /// [`Agent::derive_status`]) is audited once per sweep tick; status
    /// itself is derived, not written back, so no row mutation happens
    /// here.
    async fn sweep_once(&self) {
        let threshold = self.clock.now() - self.heartbeat_threshold * 3;
        match self.agents.list_stale(threshold).await {
            Ok(stale) => {
                for agent in &stale {
                    warn!(agent_id = %agent.id, tenant_id = %agent.tenant_id, "agent offline sweep");
                    self.audit.record(offline_event(agent, threshold)).await;
                }
                info!(count = stale.len(), "offline sweep completed");
            }
            Err(err) => warn!(error = %err, "offline sweep failed to list stale agents"),
        }
    }

    pub fn spawn_sweeper(self: &Arc<Self>, interval: StdDuration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => registry.sweep_once().await,
                    () = cancel.cancelled() => break,
                }
            }
        })
    }
}

fn offline_event(agent: &Agent, threshold: DateTime<Utc>) -> meridian_core::models::AuditEvent {
    meridian_core::models::AuditEvent::new(
        agent.tenant_id,
        "agent",
        "offline_sweep",
        meridian_core::models::AuditOutcome::Success,
        "system",
        format!("agent:{}", agent.id),
        threshold,
    )
}

fn deregister_event(tenant_id: Uuid, agent_id: &str, now: DateTime<Utc>) -> meridian_core::models::AuditEvent {
    meridian_core::models::AuditEvent::new(tenant_id, "agent", "deregistered", meridian_core::models::AuditOutcome::Success, "system", format!("agent:{agent_id}"), now)
}
