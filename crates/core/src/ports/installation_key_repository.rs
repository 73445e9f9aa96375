use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::InstallationKey;

#[async_trait]
pub trait InstallationKeyRepository: Send + Sync {
    async fn create(&self, key: &InstallationKey) -> Result<()>;
    async fn get_by_hash(&self, key_hash: &str) -> Result<Option<InstallationKey>>;

    /// Atomically increments `usage_count` with a `WHERE usage_count <
    /// usage_limit` guard, returning `false` if the key was already
    /// exhausted by a concurrent registration (spec §8 invariant 4).
    async fn try_consume(&self, id: Uuid) -> Result<bool>;
}
