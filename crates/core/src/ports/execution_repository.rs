use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{ExecutionResult, ExecutionStatus, WorkflowExecution};

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Creates the row in `Pending` and, in the same operation, claims the
    /// `(agent_id, workflow_id)` pair — returning `Err(Conflict)` if a
    /// non-terminal execution already exists for that pair (spec §4.2
    /// at-most-one-concurrent rule, invariant 2). Implementations back
    /// this with a unique partial index or an application-level claim
    /// record; either must hold across crash-restart.
    async fn create_and_claim(&self, execution: &WorkflowExecution) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>>;

    async fn mark_running(&self, id: Uuid) -> Result<()>;

    /// Transitions to a terminal status. Must be a no-op error (not a
    /// panic) if the row is already terminal (invariant 8).
    async fn mark_terminal(&self, id: Uuid, status: ExecutionStatus, result: Option<ExecutionResult>) -> Result<()>;

    async fn list_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<WorkflowExecution>>;

    /// Agent ids already targeted by this campaign — used to subtract
    /// already-processed agents from the candidate set (spec §4.1 step 2,
    /// invariant 1).
    async fn agent_ids_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<String>>;

    async fn count_non_terminal_for_agent_workflow(&self, agent_id: &str, workflow_id: Uuid) -> Result<u32>;

    /// Executions still in `{pending, running}` targeting one agent —
    /// feeds deregistration (spec §4.1 "already-pending executions
    /// targeting a now-missing agent are marked cancelled").
    async fn list_non_terminal_for_agent(&self, tenant_id: Uuid, agent_id: &str) -> Result<Vec<WorkflowExecution>>;

    /// Executions still in `{pending, running}` beyond `workflow_timeout +
    /// grace` — feeds the timeout reconciliation sweep (spec §4.2).
    async fn list_overdue(&self, older_than: chrono::DateTime<chrono::Utc>) -> Result<Vec<WorkflowExecution>>;
}
