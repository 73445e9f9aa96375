//! SQLite implementation of `ExecutionRepository`.
//!
//! `create_and_claim` and the unique partial indexes in the schema
//! together implement invariants 1 and 2 (spec §8): the database, not
//! application code, is the source of truth for "at most one".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_core::models::{ExecutionResult, ExecutionStatus, WorkflowExecution};
use meridian_core::ports::ExecutionRepository;
use meridian_core::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{map_sqlx_err, parse_datetime, parse_json, parse_optional_datetime, parse_optional_uuid, parse_uuid};

#[derive(Clone)]
pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_and_claim(&self, execution: &WorkflowExecution) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO workflow_executions
               (id, tenant_id, workflow_id, agent_id, campaign_id, phase_id, status, result, attempt_count, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.tenant_id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(&execution.agent_id)
        .bind(execution.campaign_id.map(|id| id.to_string()))
        .bind(execution.phase_id.map(|id| id.to_string()))
        .bind(status_str(execution.status))
        .bind(execution.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(i64::from(execution.attempt_count))
        .bind(execution.started_at.map(|t| t.to_rfc3339()))
        .bind(execution.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::conflict(format!("agent {} already has a non-terminal execution for this workflow", execution.agent_id))
            }
            _ => map_sqlx_err(err),
        })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>> {
        let row: Option<ExecutionRow> = sqlx::query_as("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn mark_running(&self, id: Uuid) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"UPDATE workflow_executions SET status = 'running', attempt_count = attempt_count + 1,
               started_at = COALESCE(started_at, ?)
               WHERE id = ? AND status NOT IN ('success', 'failed', 'cancelled', 'timeout')"#,
        )
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::conflict(format!("execution {id} already reached a terminal status")));
        }
        Ok(())
    }

    async fn mark_terminal(&self, id: Uuid, status: ExecutionStatus, result: Option<ExecutionResult>) -> Result<()> {
        let result_json = result.as_ref().map(serde_json::to_string).transpose()?;
        let now = Utc::now().to_rfc3339();
        let update_result = sqlx::query(
            r#"UPDATE workflow_executions SET status = ?, result = ?, completed_at = ?
               WHERE id = ? AND status NOT IN ('success', 'failed', 'cancelled', 'timeout')"#,
        )
        .bind(status_str(status))
        .bind(result_json)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if update_result.rows_affected() == 0 {
            return Err(Error::conflict(format!("execution {id} already reached a terminal status")));
        }
        Ok(())
    }

    async fn list_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<WorkflowExecution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as("SELECT * FROM workflow_executions WHERE campaign_id = ?")
            .bind(campaign_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn agent_ids_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT agent_id FROM workflow_executions WHERE campaign_id = ?")
            .bind(campaign_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn list_non_terminal_for_agent(&self, tenant_id: Uuid, agent_id: &str) -> Result<Vec<WorkflowExecution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"SELECT * FROM workflow_executions
               WHERE tenant_id = ? AND agent_id = ? AND status IN ('pending', 'running')"#,
        )
        .bind(tenant_id.to_string())
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_non_terminal_for_agent_workflow(&self, agent_id: &str, workflow_id: Uuid) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM workflow_executions
               WHERE agent_id = ? AND workflow_id = ? AND status IN ('pending', 'running')"#,
        )
        .bind(agent_id)
        .bind(workflow_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(count as u32)
    }

    async fn list_overdue(&self, older_than: DateTime<Utc>) -> Result<Vec<WorkflowExecution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r#"SELECT * FROM workflow_executions
               WHERE status IN ('pending', 'running') AND started_at IS NOT NULL AND started_at < ?"#,
        )
        .bind(older_than.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

fn status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Pending => "pending",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Success => "success",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
        ExecutionStatus::Timeout => "timeout",
    }
}

fn parse_status(s: &str) -> Result<ExecutionStatus> {
    match s {
        "pending" => Ok(ExecutionStatus::Pending),
        "running" => Ok(ExecutionStatus::Running),
        "success" => Ok(ExecutionStatus::Success),
        "failed" => Ok(ExecutionStatus::Failed),
        "cancelled" => Ok(ExecutionStatus::Cancelled),
        "timeout" => Ok(ExecutionStatus::Timeout),
        other => Err(Error::internal(format!("invalid execution status in row: {other}"))),
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: String,
    tenant_id: String,
    workflow_id: String,
    agent_id: String,
    campaign_id: Option<String>,
    phase_id: Option<String>,
    status: String,
    result: Option<String>,
    attempt_count: i64,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<ExecutionRow> for WorkflowExecution {
    type Error = Error;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        let result: Option<ExecutionResult> = row.result.as_deref().map(parse_json).transpose()?;
        Ok(WorkflowExecution {
            id: parse_uuid(&row.id)?,
            tenant_id: parse_uuid(&row.tenant_id)?,
            workflow_id: parse_uuid(&row.workflow_id)?,
            agent_id: row.agent_id,
            campaign_id: parse_optional_uuid(row.campaign_id)?,
            phase_id: parse_optional_uuid(row.phase_id)?,
            status: parse_status(&row.status)?,
            result,
            attempt_count: row.attempt_count as u32,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_migrated_test_pool;

    #[tokio::test]
    async fn create_and_claim_rejects_second_pending_execution() {
        let pool = create_migrated_test_pool().await.expect("pool");
        let repo = SqliteExecutionRepository::new(pool);
        let tenant_id = Uuid::new_v4();
        let workflow_id = Uuid::new_v4();

        let first = WorkflowExecution::new_pending(tenant_id, workflow_id, "a1".into(), None, None);
        repo.create_and_claim(&first).await.expect("first claim");

        let second = WorkflowExecution::new_pending(tenant_id, workflow_id, "a1".into(), None, None);
        let err = repo.create_and_claim(&second).await.expect_err("second claim must conflict");
        assert_eq!(err.kind, meridian_core::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn mark_terminal_twice_is_rejected_not_panicked() {
        let pool = create_migrated_test_pool().await.expect("pool");
        let repo = SqliteExecutionRepository::new(pool);
        let execution = WorkflowExecution::new_pending(Uuid::new_v4(), Uuid::new_v4(), "a1".into(), None, None);
        repo.create_and_claim(&execution).await.expect("claim");

        repo.mark_terminal(execution.id, ExecutionStatus::Success, None).await.expect("first terminal");
        assert!(repo.mark_terminal(execution.id, ExecutionStatus::Failed, None).await.is_err());
    }
}
