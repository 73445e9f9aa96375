//! SQLite implementation of `AgentRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_core::models::{Agent, Selector};
use meridian_core::ports::AgentRepository;
use meridian_core::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use super::{map_sqlx_err, parse_datetime, parse_json, parse_uuid};

#[derive(Clone)]
pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn upsert(&self, agent: &Agent) -> Result<()> {
        let tags_json = serde_json::to_string(&agent.tags)?;
        sqlx::query(
            r#"INSERT INTO agents (id, tenant_id, hostname, os, arch, version, tags, last_seen_at, registered_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id, tenant_id) DO UPDATE SET
                   hostname = excluded.hostname, os = excluded.os, arch = excluded.arch,
                   version = excluded.version, tags = excluded.tags, last_seen_at = excluded.last_seen_at"#,
        )
        .bind(&agent.id)
        .bind(agent.tenant_id.to_string())
        .bind(&agent.hostname)
        .bind(&agent.os)
        .bind(&agent.arch)
        .bind(&agent.version)
        .bind(&tags_json)
        .bind(agent.last_seen_at.to_rfc3339())
        .bind(agent.registered_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get(&self, tenant_id: Uuid, id: &str) -> Result<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.to_string())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn delete(&self, tenant_id: Uuid, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM agents WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn list(&self, tenant_id: Uuid) -> Result<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE tenant_id = ? ORDER BY registered_at")
            .bind(tenant_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Applies the selector's `tags` predicate in SQL; `status` is derived
    /// from a clock the repository doesn't have, so the caller applies
    /// that half of [`Selector::matches`] itself.
    async fn list_matching(&self, tenant_id: Uuid, selector: &Selector) -> Result<Vec<Agent>> {
        let agents = self.list(tenant_id).await?;
        Ok(agents.into_iter().filter(|a| selector.tags.iter().all(|(k, v)| a.tags.get(k) == Some(v))).collect())
    }

    async fn update_last_seen(&self, tenant_id: Uuid, id: &str, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE agents SET last_seen_at = ? WHERE tenant_id = ? AND id = ?")
            .bind(now.to_rfc3339())
            .bind(tenant_id.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("agent {id} not found")));
        }
        Ok(())
    }

    async fn list_stale(&self, threshold: DateTime<Utc>) -> Result<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE last_seen_at < ?")
            .bind(threshold.to_rfc3339())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    tenant_id: String,
    hostname: String,
    os: String,
    arch: String,
    version: String,
    tags: String,
    last_seen_at: String,
    registered_at: String,
}

impl TryFrom<AgentRow> for Agent {
    type Error = Error;

    fn try_from(row: AgentRow) -> Result<Self> {
        let tags: HashMap<String, String> = parse_json(&row.tags)?;
        Ok(Agent {
            id: row.id,
            tenant_id: parse_uuid(&row.tenant_id)?,
            hostname: row.hostname,
            os: row.os,
            arch: row.arch,
            version: row.version,
            tags,
            last_seen_at: parse_datetime(&row.last_seen_at)?,
            registered_at: parse_datetime(&row.registered_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_migrated_test_pool;
    use chrono::Duration;

    fn agent(tenant_id: Uuid, id: &str, last_seen: DateTime<Utc>) -> Agent {
        Agent {
            id: id.to_string(),
            tenant_id,
            hostname: "host".into(),
            os: "linux".into(),
            arch: "x86_64".into(),
            version: "1.0.0".into(),
            tags: HashMap::from([("region".to_string(), "us-east".to_string())]),
            last_seen_at: last_seen,
            registered_at: last_seen,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_id_and_tenant() {
        let pool = create_migrated_test_pool().await.expect("pool");
        let repo = SqliteAgentRepository::new(pool);
        let tenant_id = Uuid::new_v4();
        let now = Utc::now();
        repo.upsert(&agent(tenant_id, "a1", now)).await.expect("upsert");
        repo.upsert(&agent(tenant_id, "a1", now + Duration::seconds(5))).await.expect("upsert again");

        let all = repo.list(tenant_id).await.expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn list_matching_filters_by_tag() {
        let pool = create_migrated_test_pool().await.expect("pool");
        let repo = SqliteAgentRepository::new(pool);
        let tenant_id = Uuid::new_v4();
        let now = Utc::now();
        repo.upsert(&agent(tenant_id, "a1", now)).await.expect("upsert");

        let mut selector = Selector::default();
        selector.tags.insert("region".into(), "us-west".into());
        let matches = repo.list_matching(tenant_id, &selector).await.expect("list_matching");
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn list_stale_finds_agents_past_threshold() {
        let pool = create_migrated_test_pool().await.expect("pool");
        let repo = SqliteAgentRepository::new(pool);
        let tenant_id = Uuid::new_v4();
        let now = Utc::now();
        repo.upsert(&agent(tenant_id, "stale", now - Duration::hours(2))).await.expect("upsert");

        let stale = repo.list_stale(now - Duration::hours(1)).await.expect("list_stale");
        assert_eq!(stale.len(), 1);
    }
}
