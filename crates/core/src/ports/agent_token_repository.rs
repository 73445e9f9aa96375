use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::AgentToken;

#[async_trait]
pub trait AgentTokenRepository: Send + Sync {
    async fn create(&self, token: &AgentToken) -> Result<()>;

    /// Revokes every non-revoked token for `agent_id`. Called on
    /// re-registration and on deregister (spec §3 ownership: revocation
    /// cascades on deregister).
    async fn revoke_all_for_agent(&self, agent_id: &str, now: DateTime<Utc>) -> Result<()>;

    async fn get_valid_by_hash(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<AgentToken>>;
}
