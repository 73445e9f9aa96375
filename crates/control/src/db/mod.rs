//! SQLite adapters implementing the `meridian-core::ports` traits,
//! grounded on the teacher's `adapters/sqlite/` module.

pub mod agent_repository;
pub mod agent_token_repository;
pub mod campaign_repository;
pub mod connection;
pub mod execution_repository;
pub mod installation_key_repository;
pub mod migrations;
pub mod tenant_repository;
pub mod workflow_repository;

pub use agent_repository::SqliteAgentRepository;
pub use agent_token_repository::SqliteAgentTokenRepository;
pub use campaign_repository::{SqliteCampaignPhaseRepository, SqliteCampaignRepository};
pub use connection::{create_pool, create_test_pool, migrate, ConnectionError};
pub use execution_repository::SqliteExecutionRepository;
pub use installation_key_repository::SqliteInstallationKeyRepository;
pub use tenant_repository::SqliteTenantRepository;
pub use workflow_repository::SqliteWorkflowRepository;

use chrono::{DateTime, Utc};
use meridian_core::{Error, ErrorKind};
use uuid::Uuid;

pub fn map_sqlx_err(err: sqlx::Error) -> Error {
    Error::new(ErrorKind::Internal, format!("database error: {err}"))
}

pub fn parse_uuid(s: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(s).map_err(|e| Error::internal(format!("invalid uuid in row: {e}")))
}

pub fn parse_optional_uuid(s: Option<String>) -> Result<Option<Uuid>, Error> {
    s.map(|s| Uuid::parse_str(&s)).transpose().map_err(|e| Error::internal(format!("invalid uuid in row: {e}")))
}

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).map_err(|e| Error::internal(format!("invalid timestamp in row: {e}")))
}

pub fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, Error> {
    s.map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| Error::internal(format!("invalid timestamp in row: {e}")))
}

pub fn parse_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, Error> {
    serde_json::from_str(s).map_err(|e| Error::internal(format!("invalid json in row: {e}")))
}

#[cfg(test)]
pub async fn create_migrated_test_pool() -> Result<sqlx::SqlitePool, Error> {
    let pool = create_test_pool().await.map_err(|e| Error::internal(e.to_string()))?;
    migrate(&pool).await.map_err(|e| Error::internal(e.to_string()))?;
    Ok(pool)
}
