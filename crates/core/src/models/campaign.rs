use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::selector::Selector;
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    RollingBack,
}

impl CampaignStatus {
    /// Spec §4.1 state machine.
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Running)
                | (Paused, Running)
                | (Running, Paused)
                | (Draft, Cancelled)
                | (Running, Cancelled)
                | (Paused, Cancelled)
                | (Running, RollingBack)
                | (RollingBack, Failed)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

/// Declarative input for one phase, supplied at `Create` (spec §4.1). The
/// optional `rollback_threshold` is carried per-phase, per spec §9's
/// design note that it is "part of phase_config".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub name: String,
    /// Percentage in `(0, 100]` of the *remaining* candidate set (spec §9
    /// Open Question — this implementation applies percentage to the
    /// remaining set, not the original population; see DESIGN.md).
    pub percentage: f64,
    /// Success threshold in percent, compared against
    /// `success_count / (success_count + failure_count)`.
    pub success_threshold: f64,
    pub wait_minutes: u32,
    pub rollback_threshold: Option<f64>,
}

impl PhaseDefinition {
    pub fn validate(&self) -> Result<()> {
        if !(self.percentage > 0.0 && self.percentage <= 100.0) {
            return Err(Error::validation("phase percentage must be in (0, 100]"));
        }
        if !(0.0..=100.0).contains(&self.success_threshold) {
            return Err(Error::validation("phase success_threshold must be in [0, 100]"));
        }
        Ok(())
    }
}

/// A persisted, ordered stage of a campaign (spec §3). Phases execute
/// strictly in `order` ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignPhase {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub order: u32,
    pub definition: PhaseDefinition,
    pub target_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CampaignPhase {
    pub fn new(campaign_id: Uuid, order: u32, definition: PhaseDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            order,
            definition,
            target_count: 0,
            success_count: 0,
            failure_count: 0,
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }

    /// Phase is complete iff all its executions reached a terminal status
    /// — the caller supplies the count of still-outstanding executions.
    pub fn is_complete(&self, outstanding: u32) -> bool {
        outstanding == 0
    }

    /// Empty cohort counts as success (spec §4.1 step 4, boundary
    /// behaviour in §8).
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            100.0
        } else {
            (f64::from(self.success_count) / f64::from(total)) * 100.0
        }
    }

    pub fn meets_success_threshold(&self) -> bool {
        self.success_rate() >= self.definition.success_threshold
    }
}

/// A phased rollout of one workflow across a selected agent population
/// (spec §3). The selector is immutable after `Start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub target_selector: Selector,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(tenant_id: Uuid, workflow_id: Uuid, name: impl Into<String>, target_selector: Selector, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            workflow_id,
            name: name.into(),
            status: CampaignStatus::Draft,
            target_selector,
            created_at: now,
            started_at: None,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: CampaignStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::conflict(format!("illegal campaign transition {:?} -> {:?}", self.status, next)));
        }
        if next == CampaignStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Cancelling an already-cancelled campaign is a no-op (spec §8
    /// round-trip law).
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status == CampaignStatus::Cancelled {
            return Ok(());
        }
        self.transition(CampaignStatus::Cancelled, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cohort_is_instant_success() {
        let phase = CampaignPhase::new(Uuid::new_v4(), 0, PhaseDefinition { name: "p".into(), percentage: 10.0, success_threshold: 100.0, wait_minutes: 0, rollback_threshold: None });
        assert!(phase.meets_success_threshold());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut campaign = Campaign::new(Uuid::new_v4(), Uuid::new_v4(), "c", Selector::default(), Utc::now());
        campaign.cancel(Utc::now()).expect("cancel");
        assert_eq!(campaign.status, CampaignStatus::Cancelled);
        campaign.cancel(Utc::now()).expect("cancel again is a no-op");
        assert_eq!(campaign.status, CampaignStatus::Cancelled);
    }

    #[test]
    fn rejects_illegal_transition() {
        let mut campaign = Campaign::new(Uuid::new_v4(), Uuid::new_v4(), "c", Selector::default(), Utc::now());
        assert!(campaign.transition(CampaignStatus::Completed, Utc::now()).is_err());
    }
}
