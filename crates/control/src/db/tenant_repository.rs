//! SQLite implementation of `TenantRepository`.

use async_trait::async_trait;
use meridian_core::models::{Tenant, TenantStatus};
use meridian_core::ports::TenantRepository;
use meridian_core::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{map_sqlx_err, parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteTenantRepository {
    pool: SqlitePool,
}

impl SqliteTenantRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantRepository for SqliteTenantRepository {
    async fn create(&self, tenant: &Tenant) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO tenants (id, name, status, agent_quota, workflow_quota, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(tenant.id.to_string())
        .bind(&tenant.name)
        .bind(status_str(tenant.status))
        .bind(i64::from(tenant.agent_quota))
        .bind(i64::from(tenant.workflow_quota))
        .bind(tenant.created_at.to_rfc3339())
        .bind(tenant.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as("SELECT * FROM tenants WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as("SELECT * FROM tenants WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, tenant: &Tenant) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE tenants SET name = ?, status = ?, agent_quota = ?, workflow_quota = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&tenant.name)
        .bind(status_str(tenant.status))
        .bind(i64::from(tenant.agent_quota))
        .bind(i64::from(tenant.workflow_quota))
        .bind(tenant.updated_at.to_rfc3339())
        .bind(tenant.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("tenant {} not found", tenant.id)));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Tenant>> {
        let rows: Vec<TenantRow> = sqlx::query_as("SELECT * FROM tenants ORDER BY created_at").fetch_all(&self.pool).await.map_err(map_sqlx_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_agents(&self, tenant_id: Uuid) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agents WHERE tenant_id = ?")
            .bind(tenant_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(count as u32)
    }

    async fn count_workflows(&self, tenant_id: Uuid) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workflows WHERE tenant_id = ? AND status != 'deleted'")
            .bind(tenant_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(count as u32)
    }
}

fn status_str(status: TenantStatus) -> &'static str {
    match status {
        TenantStatus::Active => "active",
        TenantStatus::Suspended => "suspended",
        TenantStatus::Deleted => "deleted",
    }
}

fn parse_status(s: &str) -> Result<TenantStatus> {
    match s {
        "active" => Ok(TenantStatus::Active),
        "suspended" => Ok(TenantStatus::Suspended),
        "deleted" => Ok(TenantStatus::Deleted),
        other => Err(Error::internal(format!("invalid tenant status in row: {other}"))),
    }
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    name: String,
    status: String,
    agent_quota: i64,
    workflow_quota: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = Error;

    fn try_from(row: TenantRow) -> Result<Self> {
        Ok(Tenant {
            id: parse_uuid(&row.id)?,
            name: row.name,
            status: parse_status(&row.status)?,
            agent_quota: row.agent_quota as u32,
            workflow_quota: row.workflow_quota as u32,
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

    #[tokio::test]
    async fn creates_and_fetches_by_name() {
        let pool = create_migrated_test_pool().await.expect("pool");
        let repo = SqliteTenantRepository::new(pool);
        let tenant = Tenant::new("acme", 100, 20, Utc::now());
        repo.create(&tenant).await.expect("create");

        let fetched = repo.get_by_name("acme").await.expect("get").expect("present");
        assert_eq!(fetched.id, tenant.id);
        assert_eq!(repo.count_agents(tenant.id).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn update_rejects_unknown_tenant() {
        let pool = create_migrated_test_pool().await.expect("pool");
        let repo = SqliteTenantRepository::new(pool);
        let tenant = Tenant::new("ghost", 1, 1, Utc::now());
        assert!(repo.update(&tenant).await.is_err());
    }
}
