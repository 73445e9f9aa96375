//! SQLite implementation of `InstallationKeyRepository`.

use async_trait::async_trait;
use meridian_core::models::InstallationKey;
use meridian_core::ports::InstallationKeyRepository;
use meridian_core::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{map_sqlx_err, parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteInstallationKeyRepository {
    pool: SqlitePool,
}

impl SqliteInstallationKeyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstallationKeyRepository for SqliteInstallationKeyRepository {
    async fn create(&self, key: &InstallationKey) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO installation_keys (id, tenant_id, key_hash, usage_limit, usage_count, expires_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(key.id.to_string())
        .bind(key.tenant_id.to_string())
        .bind(&key.key_hash)
        .bind(i64::from(key.usage_limit))
        .bind(i64::from(key.usage_count))
        .bind(key.expires_at.to_rfc3339())
        .bind(key.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn get_by_hash(&self, key_hash: &str) -> Result<Option<InstallationKey>> {
        let row: Option<InstallationKeyRow> = sqlx::query_as("SELECT * FROM installation_keys WHERE key_hash = ?")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(TryInto::try_into).transpose()
    }

    /// Single conditional `UPDATE` so concurrent registrations against the
    /// same key cannot both succeed once the limit is reached.
    async fn try_consume(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE installation_keys SET usage_count = usage_count + 1 WHERE id = ? AND usage_count < usage_limit")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(sqlx::FromRow)]
struct InstallationKeyRow {
    id: String,
    tenant_id: String,
    key_hash: String,
    usage_limit: i64,
    usage_count: i64,
    expires_at: String,
    created_at: String,
}

impl TryFrom<InstallationKeyRow> for InstallationKey {
    type Error = Error;

    fn try_from(row: InstallationKeyRow) -> Result<Self> {
        Ok(InstallationKey {
            id: parse_uuid(&row.id)?,
            tenant_id: parse_uuid(&row.tenant_id)?,
            key_hash: row.key_hash,
            usage_limit: row.usage_limit as u32,
            usage_count: row.usage_count as u32,
            expires_at: parse_datetime(&row.expires_at)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_migrated_test_pool;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn try_consume_stops_at_limit() {
        let pool = create_migrated_test_pool().await.expect("pool");
        let repo = SqliteInstallationKeyRepository::new(pool);
        let now = Utc::now();
        let key = InstallationKey::new(Uuid::new_v4(), "hash".into(), 1, now + Duration::days(1), now).expect("new");
        repo.create(&key).await.expect("create");

        assert!(repo.try_consume(key.id).await.expect("first consume"));
        assert!(!repo.try_consume(key.id).await.expect("second consume"));
    }
}
