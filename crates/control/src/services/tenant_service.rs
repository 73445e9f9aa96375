//! Tenant lifecycle and the quota guard referenced throughout spec §4
//! (`CheckAgentQuota`, `CheckWorkflowQuota`).

use std::sync::Arc;

use chrono::Utc;
use meridian_core::models::Tenant;
use meridian_core::ports::TenantRepository;
use meridian_core::{Error, Result};
use uuid::Uuid;

pub struct TenantService {
    tenants: Arc<dyn TenantRepository>,
}

impl TenantService {
    pub fn new(tenants: Arc<dyn TenantRepository>) -> Self {
        Self { tenants }
    }

    pub async fn create(&self, name: impl Into<String>, agent_quota: u32, workflow_quota: u32) -> Result<Tenant> {
        let name = name.into();
        if self.tenants.get_by_name(&name).await?.is_some() {
            return Err(Error::conflict(format!("tenant {name} already exists")));
        }
        let tenant = Tenant::new(name, agent_quota, workflow_quota, Utc::now());
        self.tenants.create(&tenant).await?;
        Ok(tenant)
    }

    pub async fn get(&self, id: Uuid) -> Result<Tenant> {
        self.tenants.get(id).await?.ok_or_else(|| Error::not_found(format!("tenant {id} not found")))
    }

    pub async fn suspend(&self, id: Uuid) -> Result<()> {
        let mut tenant = self.get(id).await?;
        tenant.suspend(Utc::now())?;
        self.tenants.update(&tenant).await
    }

    pub async fn reactivate(&self, id: Uuid) -> Result<()> {
        let mut tenant = self.get(id).await?;
        tenant.reactivate(Utc::now())?;
        self.tenants.update(&tenant).await
    }

    /// Spec §4.5 `CheckAgentQuota`: rejects enrollment once the tenant's
    /// current agent count reaches `agent_quota`.
    pub async fn check_agent_quota(&self, tenant_id: Uuid) -> Result<()> {
        let tenant = self.get(tenant_id).await?;
        let count = self.tenants.count_agents(tenant_id).await?;
        if count >= tenant.agent_quota {
            return Err(Error::quota_exceeded(format!("tenant {tenant_id} has reached its agent quota of {}", tenant.agent_quota)));
        }
        Ok(())
    }

    pub async fn check_workflow_quota(&self, tenant_id: Uuid) -> Result<()> {
        let tenant = self.get(tenant_id).await?;
        let count = self.tenants.count_workflows(tenant_id).await?;
        if count >= tenant.workflow_quota {
            return Err(Error::quota_exceeded(format!("tenant {tenant_id} has reached its workflow quota of {}", tenant.workflow_quota)));
        }
        Ok(())
    }

    /// `Suspended`/`Deleted` tenants reject all dispatch (spec §3).
    pub async fn assert_dispatch_allowed(&self, tenant_id: Uuid) -> Result<()> {
        let tenant = self.get(tenant_id).await?;
        if tenant.rejects_dispatch() {
            return Err(Error::forbidden_as_not_found(format!("tenant {tenant_id} does not accept dispatch")));
        }
        Ok(())
    }
}
