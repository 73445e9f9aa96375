//! Versioned workflow store (spec §3 `Workflow`).

use std::sync::Arc;

use chrono::Utc;
use meridian_core::models::{Workflow, WorkflowDefinition};
use meridian_core::ports::WorkflowRepository;
use meridian_core::{Error, Result};
use uuid::Uuid;

use super::tenant_service::TenantService;

pub struct WorkflowService {
    workflows: Arc<dyn WorkflowRepository>,
    tenants: Arc<TenantService>,
}

impl WorkflowService {
    pub fn new(workflows: Arc<dyn WorkflowRepository>, tenants: Arc<TenantService>) -> Self {
        Self { workflows, tenants }
    }

    pub async fn create(&self, tenant_id: Uuid, name: impl Into<String>, definition: WorkflowDefinition) -> Result<Workflow> {
        self.tenants.check_workflow_quota(tenant_id).await?;
        let workflow = Workflow::new(tenant_id, name, definition, Utc::now())?;
        self.workflows.create(&workflow).await?;
        Ok(workflow)
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> Result<Workflow> {
        self.workflows.get(tenant_id, id).await?.ok_or_else(|| Error::not_found(format!("workflow {id} not found")))
    }

    pub async fn edit(&self, tenant_id: Uuid, id: Uuid, definition: WorkflowDefinition) -> Result<Workflow> {
        let mut workflow = self.get(tenant_id, id).await?;
        workflow.edit_definition(definition, Utc::now())?;
        self.workflows.update(&workflow).await?;
        Ok(workflow)
    }

    pub async fn activate(&self, tenant_id: Uuid, id: Uuid) -> Result<Workflow> {
        let mut workflow = self.get(tenant_id, id).await?;
        workflow.activate(Utc::now())?;
        self.workflows.update(&workflow).await?;
        Ok(workflow)
    }

    /// Spec §4.1 `Create`: campaigns may only target an `active` workflow.
    pub async fn require_active(&self, tenant_id: Uuid, id: Uuid) -> Result<Workflow> {
        let workflow = self.get(tenant_id, id).await?;
        if !workflow.is_dispatchable() {
            return Err(Error::validation(format!("workflow {id} is not active")));
        }
        Ok(workflow)
    }

    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<Workflow>> {
        self.workflows.list(tenant_id).await
    }
}
