//! SQLite implementation of `AgentTokenRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meridian_core::models::AgentToken;
use meridian_core::ports::AgentTokenRepository;
use meridian_core::{Error, Result};
use sqlx::SqlitePool;

use super::{map_sqlx_err, parse_datetime, parse_optional_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteAgentTokenRepository {
    pool: SqlitePool,
}

impl SqliteAgentTokenRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentTokenRepository for SqliteAgentTokenRepository {
    async fn create(&self, token: &AgentToken) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO agent_tokens (id, agent_id, tenant_id, token_hash, expires_at, revoked_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(token.id.to_string())
        .bind(&token.agent_id)
        .bind(token.tenant_id.to_string())
        .bind(&token.token_hash)
        .bind(token.expires_at.to_rfc3339())
        .bind(token.revoked_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn revoke_all_for_agent(&self, agent_id: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE agent_tokens SET revoked_at = ? WHERE agent_id = ? AND revoked_at IS NULL")
            .bind(now.to_rfc3339())
            .bind(agent_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get_valid_by_hash(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<AgentToken>> {
        let row: Option<AgentTokenRow> = sqlx::query_as("SELECT * FROM agent_tokens WHERE token_hash = ? AND revoked_at IS NULL AND expires_at > ?")
            .bind(token_hash)
            .bind(now.to_rfc3339())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(TryInto::try_into).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct AgentTokenRow {
    id: String,
    agent_id: String,
    tenant_id: String,
    token_hash: String,
    expires_at: String,
    revoked_at: Option<String>,
}

impl TryFrom<AgentTokenRow> for AgentToken {
    type Error = Error;

    fn try_from(row: AgentTokenRow) -> Result<Self> {
        Ok(AgentToken {
            id: parse_uuid(&row.id)?,
            agent_id: row.agent_id,
            tenant_id: parse_uuid(&row.tenant_id)?,
            token_hash: row.token_hash,
            expires_at: parse_datetime(&row.expires_at)?,
            revoked_at: parse_optional_datetime(row.revoked_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_migrated_test_pool;
    use chrono::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn reregistration_revokes_prior_token() {
        let pool = create_migrated_test_pool().await.expect("pool");
        let repo = SqliteAgentTokenRepository::new(pool);
        let now = Utc::now();
        let token = AgentToken::new("a1".into(), Uuid::new_v4(), "hash1".into(), now + Duration::days(30));
        repo.create(&token).await.expect("create");

        assert!(repo.get_valid_by_hash("hash1", now).await.expect("get").is_some());

        repo.revoke_all_for_agent("a1", now).await.expect("revoke");
        assert!(repo.get_valid_by_hash("hash1", now).await.expect("get after revoke").is_none());
    }
}
