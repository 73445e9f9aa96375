use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::Workflow;

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn create(&self, workflow: &Workflow) -> Result<()>;
    async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Workflow>>;
    async fn update(&self, workflow: &Workflow) -> Result<()>;
    async fn list(&self, tenant_id: Uuid) -> Result<Vec<Workflow>>;
}
