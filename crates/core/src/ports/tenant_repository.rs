use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::Tenant;

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn create(&self, tenant: &Tenant) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Tenant>>;
    async fn get_by_name(&self, name: &str) -> Result<Option<Tenant>>;
    async fn update(&self, tenant: &Tenant) -> Result<()>;
    async fn list(&self) -> Result<Vec<Tenant>>;

    /// Current agent count for quota checks (spec §4.5 `CheckAgentQuota`).
    async fn count_agents(&self, tenant_id: Uuid) -> Result<u32>;
    async fn count_workflows(&self, tenant_id: Uuid) -> Result<u32>;
}
