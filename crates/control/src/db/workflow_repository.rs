//! SQLite implementation of `WorkflowRepository`.

use async_trait::async_trait;
use meridian_core::models::{Workflow, WorkflowDefinition, WorkflowStatus};
use meridian_core::ports::WorkflowRepository;
use meridian_core::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{map_sqlx_err, parse_datetime, parse_json, parse_uuid};

#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create(&self, workflow: &Workflow) -> Result<()> {
        let definition_json = serde_json::to_string(&workflow.definition)?;
        sqlx::query(
            r#"INSERT INTO workflows (id, tenant_id, name, definition, version, status, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.tenant_id.to_string())
        .bind(&workflow.name)
        .bind(&definition_json)
        .bind(i64::from(workflow.version))
        .bind(status_str(workflow.status))
        .bind(workflow.created_at.to_rfc3339())
        .bind(workflow.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Workflow>> {
        let row: Option<WorkflowRow> = sqlx::query_as("SELECT * FROM workflows WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.to_string())
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, workflow: &Workflow) -> Result<()> {
        let definition_json = serde_json::to_string(&workflow.definition)?;
        let result = sqlx::query(
            r#"UPDATE workflows SET name = ?, definition = ?, version = ?, status = ?, updated_at = ?
               WHERE id = ? AND tenant_id = ?"#,
        )
        .bind(&workflow.name)
        .bind(&definition_json)
        .bind(i64::from(workflow.version))
        .bind(status_str(workflow.status))
        .bind(workflow.updated_at.to_rfc3339())
        .bind(workflow.id.to_string())
        .bind(workflow.tenant_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("workflow {} not found", workflow.id)));
        }
        Ok(())
    }

    async fn list(&self, tenant_id: Uuid) -> Result<Vec<Workflow>> {
        let rows: Vec<WorkflowRow> = sqlx::query_as("SELECT * FROM workflows WHERE tenant_id = ? ORDER BY created_at")
            .bind(tenant_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

fn status_str(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Draft => "draft",
        WorkflowStatus::Active => "active",
        WorkflowStatus::Deprecated => "deprecated",
        WorkflowStatus::Deleted => "deleted",
    }
}

fn parse_status(s: &str) -> Result<WorkflowStatus> {
    match s {
        "draft" => Ok(WorkflowStatus::Draft),
        "active" => Ok(WorkflowStatus::Active),
        "deprecated" => Ok(WorkflowStatus::Deprecated),
        "deleted" => Ok(WorkflowStatus::Deleted),
        other => Err(Error::internal(format!("invalid workflow status in row: {other}"))),
    }
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: String,
    tenant_id: String,
    name: String,
    definition: String,
    version: i64,
    status: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = Error;

    fn try_from(row: WorkflowRow) -> Result<Self> {
        let definition: WorkflowDefinition = parse_json(&row.definition)?;
        Ok(Workflow {
            id: parse_uuid(&row.id)?,
            tenant_id: parse_uuid(&row.tenant_id)?,
            name: row.name,
            definition,
            version: row.version as u32,
            status: parse_status(&row.status)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_migrated_test_pool;
    use chrono::Utc;
    use std::collections::HashMap;

    fn def() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "w".into(),
            timeout_secs: 1800,
            vars: HashMap::new(),
            steps: vec![meridian_core::models::StepDefinition {
                id: "s1".into(),
                name: "s1".into(),
                step_type: meridian_core::models::StepType::Command { command: "true".into(), args: vec![] },
                timeout_secs: 300,
                retry_count: 0,
                retry_delay_secs: 0,
                continue_on_error: false,
                condition: None,
            }],
            on_success: vec![],
            on_failure: vec![],
            on_cancel: vec![],
        }
    }

    #[tokio::test]
    async fn roundtrips_definition_through_json() {
        let pool = create_migrated_test_pool().await.expect("pool");
        let repo = SqliteWorkflowRepository::new(pool);
        let tenant_id = Uuid::new_v4();
        let workflow = Workflow::new(tenant_id, "deploy", def(), Utc::now()).expect("new");
        repo.create(&workflow).await.expect("create");

        let fetched = repo.get(tenant_id, workflow.id).await.expect("get").expect("present");
        assert_eq!(fetched.definition.steps.len(), 1);
        assert_eq!(fetched.version, 1);
    }
}
