use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled | Self::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub output: String,
    pub exit_code: Option<i32>,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Result payload the agent reports back for one execution (spec §4.2,
/// §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One attempt to run one workflow on one agent (spec §3). A single
/// execution belongs to at most one campaign; terminal statuses are
/// immutable (invariant 8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub agent_id: String,
    pub campaign_id: Option<Uuid>,
    /// The campaign phase this execution's cohort was drawn from. `None`
    /// for executions outside a campaign. Carried on the row itself so a
    /// terminal transition can credit the right phase's counters without
    /// having to guess which phase was running at the time (spec §4.1).
    pub phase_id: Option<Uuid>,
    pub status: ExecutionStatus,
    pub result: Option<ExecutionResult>,
    pub attempt_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new_pending(tenant_id: Uuid, workflow_id: Uuid, agent_id: String, campaign_id: Option<Uuid>, phase_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            workflow_id,
            agent_id,
            campaign_id,
            phase_id,
            status: ExecutionStatus::Pending,
            result: None,
            attempt_count: 0,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::conflict("execution already reached a terminal status"));
        }
        self.status = ExecutionStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        Ok(())
    }

    /// Terminal statuses are immutable (invariant 8): transitioning an
    /// execution that is already terminal is rejected.
    pub fn mark_terminal(&mut self, status: ExecutionStatus, result: Option<ExecutionResult>, now: DateTime<Utc>) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::internal("mark_terminal called with a non-terminal status"));
        }
        if self.status.is_terminal() {
            return Err(Error::conflict("execution already reached a terminal status"));
        }
        self.status = status;
        self.result = result;
        self.completed_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_never_transitions_again() {
        let mut exec = WorkflowExecution::new_pending(Uuid::new_v4(), Uuid::new_v4(), "a1".into(), None, None);
        let now = Utc::now();
        exec.mark_running(now).expect("running");
        exec.mark_terminal(ExecutionStatus::Success, None, now).expect("terminal");
        assert!(exec.mark_terminal(ExecutionStatus::Failed, None, now).is_err());
        assert!(exec.mark_running(now).is_err());
    }
}
