//! Dispatch channel (spec §4.2): posts a workflow invocation through the
//! reverse-tunnel fabric to one agent and reconciles the terminal report.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use meridian_core::models::{Agent, ExecutionResult, ExecutionStatus, Workflow, WorkflowExecution};
use meridian_core::ports::{AuditSink, CampaignPhaseRepository, ExecutionRepository};
use meridian_core::models::{AuditEvent, AuditOutcome};
use meridian_core::{Error, ErrorKind, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;

#[derive(Serialize)]
struct DispatchRequest<'a> {
    workflow_id: Uuid,
    definition: &'a meridian_core::models::WorkflowDefinition,
    parameters: HashMap<String, String>,
    execution_id: Uuid,
}

pub struct DispatchClient {
    http: Client,
    executions: Arc<dyn ExecutionRepository>,
    phases: Arc<dyn CampaignPhaseRepository>,
    audit: Arc<dyn AuditSink>,
    config: DispatchConfig,
    max_attempts: u32,
}

impl DispatchClient {
    pub fn new(executions: Arc<dyn ExecutionRepository>, phases: Arc<dyn CampaignPhaseRepository>, audit: Arc<dyn AuditSink>, config: DispatchConfig, max_attempts: u32) -> Self {
        let http = Client::builder()
            .timeout(StdDuration::from_secs(config.attempt_timeout_secs))
            .build()
            .expect("reqwest client builds with static config");
        Self { http, executions, phases, audit, config, max_attempts }
    }

    /// Credits the phase this execution's cohort belongs to with the
    /// outcome (spec §4.1 "hard part" — success/failure counters drive
    /// `meets_success_threshold` and the rollback controller). A no-op
    /// for executions outside a campaign.
    async fn record_phase_outcome(&self, execution: &WorkflowExecution, status: ExecutionStatus) {
        let Some(phase_id) = execution.phase_id else { return };
        let (success_delta, failure_delta) = if status == ExecutionStatus::Success { (1, 0) } else { (0, 1) };
        if let Err(err) = self.phases.increment_counts(phase_id, success_delta, failure_delta).await {
            warn!(execution_id = %execution.id, phase_id = %phase_id, error = %err, "failed to record phase outcome");
        }
    }

    /// Sends one execution to its agent, retrying transport/response
    /// failures with exponential backoff (spec §4.1 "Failure semantics").
    /// Leaves the execution `running` on acceptance — the terminal status
    /// arrives later via [`Self::reconcile_terminal`] or the timeout
    /// sweep in [`Self::sweep_overdue`].
    pub async fn dispatch(&self, execution: &WorkflowExecution, workflow: &Workflow, agent: &Agent) -> Result<()> {
        self.executions.mark_running(execution.id).await?;

        let url = format!("{}/upstream/{}", self.config.fabric_base_url.trim_end_matches('/'), agent.endpoint());
        let body = DispatchRequest { workflow_id: workflow.id, definition: &workflow.definition, parameters: HashMap::new(), execution_id: execution.id };

        let mut delay = StdDuration::from_millis(self.config.backoff_initial_ms);
        let max_delay = StdDuration::from_millis(self.config.backoff_max_ms);

        for attempt in 1..=self.max_attempts {
            match self.http.post(&url).json(&body).send().await {
                Ok(response) if response.status().as_u16() == 200 || response.status().as_u16() == 202 => {
                    info!(execution_id = %execution.id, agent_id = %agent.id, attempt, "dispatch accepted");
                    return Ok(());
                }
                Ok(response) => {
                    warn!(execution_id = %execution.id, status = %response.status(), attempt, "dispatch rejected by fabric");
                }
                Err(err) => {
                    warn!(execution_id = %execution.id, error = %err, attempt, "dispatch transport error");
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(max_delay, StdDuration::from_secs_f64(delay.as_secs_f64() * self.config.backoff_multiplier));
            }
        }

        let result = ExecutionResult { steps: vec![], error: Some(format!("dispatch failed after {} attempts", self.max_attempts)) };
        self.executions.mark_terminal(execution.id, ExecutionStatus::Failed, Some(result)).await?;
        self.record_phase_outcome(execution, ExecutionStatus::Failed).await;
        self.audit
            .record(AuditEvent::new(
                execution.tenant_id,
                "execution",
                "dispatch_exhausted",
                AuditOutcome::Failure,
                "dispatch_client",
                format!("execution:{}", execution.id),
                Utc::now(),
            ))
            .await;
        Ok(())
    }

    /// Marks an execution `failed` without attempting a dispatch at all —
    /// used by the campaign engine for fatal preconditions (validation,
    /// workflow not active, tenant suspended) which spec §4.1 treats as
    /// non-retryable.
    pub async fn fail_without_dispatch(&self, execution: &WorkflowExecution, reason: impl Into<String>) -> Result<()> {
        self.executions.mark_running(execution.id).await?;
        let result = ExecutionResult { steps: vec![], error: Some(reason.into()) };
        self.executions.mark_terminal(execution.id, ExecutionStatus::Failed, Some(result)).await
    }

    /// Applies an agent-reported terminal status. The caller (HTTP
    /// handler) has already authenticated the agent JWT; this enforces
    /// the tenant match spec §4.2 requires before accepting the report.
    pub async fn reconcile_terminal(&self, execution_id: Uuid, reporting_tenant_id: Uuid, status: ExecutionStatus, result: Option<ExecutionResult>) -> Result<()> {
        let execution = self.executions.get(execution_id).await?.ok_or_else(|| Error::not_found(format!("execution {execution_id} not found")))?;
        if execution.tenant_id != reporting_tenant_id {
            return Err(Error::new(ErrorKind::Forbidden, "terminal report tenant does not match execution tenant"));
        }
        self.executions.mark_terminal(execution_id, status, result).await?;
        self.record_phase_outcome(&execution, status).await;
        Ok(())
    }

    /// Transitions executions stuck in `{pending, running}` beyond
    /// `timeout_secs + grace` to `timeout` (spec §4.2 reconciliation).
    /// Per-execution workflow timeouts aren't joined here; a single
    /// conservative threshold (the workflow default plus configured
    /// grace) is used, which only under-fires for workflows with a
    /// longer-than-default `timeout_secs`.
    pub async fn sweep_overdue(&self, default_workflow_timeout_secs: u64) -> Result<u32> {
        let older_than = Utc::now() - Duration::seconds(default_workflow_timeout_secs as i64) - Duration::seconds(self.config.reconcile_grace_secs);
        let overdue = self.executions.list_overdue(older_than).await?;
        for execution in &overdue {
            let result = ExecutionResult { steps: vec![], error: Some("no terminal report within workflow timeout + grace".into()) };
            if let Err(err) = self.executions.mark_terminal(execution.id, ExecutionStatus::Timeout, Some(result)).await {
                warn!(execution_id = %execution.id, error = %err, "failed to mark execution timed out");
                continue;
            }
            self.record_phase_outcome(execution, ExecutionStatus::Timeout).await;
            self.audit
                .record(AuditEvent::new(
                    execution.tenant_id,
                    "execution",
                    "timeout",
                    AuditOutcome::Failure,
                    "dispatch_client",
                    format!("execution:{}", execution.id),
                    Utc::now(),
                ))
                .await;
        }
        Ok(overdue.len() as u32)
    }
}
