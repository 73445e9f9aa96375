use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

/// Authoritative identity and resource ceilings for one tenant.
///
/// Name uniqueness is enforced by the repository, not this type; `Deleted`
/// is terminal and `Suspended` tenants reject new dispatch (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub status: TenantStatus,
    pub agent_quota: u32,
    pub workflow_quota: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>, agent_quota: u32, workflow_quota: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: TenantStatus::Active,
            agent_quota,
            workflow_quota,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn suspend(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status == TenantStatus::Deleted {
            return Err(Error::conflict("cannot suspend a deleted tenant"));
        }
        self.status = TenantStatus::Suspended;
        self.updated_at = now;
        Ok(())
    }

    pub fn reactivate(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status == TenantStatus::Deleted {
            return Err(Error::conflict("cannot reactivate a deleted tenant"));
        }
        self.status = TenantStatus::Active;
        self.updated_at = now;
        Ok(())
    }

    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.status = TenantStatus::Deleted;
        self.updated_at = now;
    }

    pub fn rejects_dispatch(&self) -> bool {
        matches!(self.status, TenantStatus::Suspended | TenantStatus::Deleted)
    }
}
