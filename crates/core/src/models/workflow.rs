use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Deprecated,
    Deleted,
}

/// The template-deploy step singled out in spec §4.3 as the one step
/// worth calling out: atomic write-tempfile/fsync/rename, content-hash
/// no-op detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStep {
    /// `http(s)://...` or `control-plane://templates/{id}`.
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub backup: bool,
    pub mode: Option<u32>,
    pub owner: Option<String>,
    pub group: Option<String>,
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepType {
    Command { command: String, #[serde(default)] args: Vec<String> },
    Script { script: String, #[serde(default = "default_interpreter")] interpreter: String },
    File { path: String, #[serde(default)] content: Option<String>, #[serde(default)] absent: bool },
    Http { method: String, url: String, #[serde(default)] body: Option<String>, #[serde(default)] expect_status: Option<u16> },
    Validate { condition: String },
    Template(TemplateStep),
}

fn default_interpreter() -> String {
    "/bin/sh".to_string()
}

impl StepType {
    fn required_fields_present(&self) -> bool {
        match self {
            StepType::Command { command, .. } => !command.trim().is_empty(),
            StepType::Script { script, .. } => !script.trim().is_empty(),
            StepType::File { path, .. } => !path.trim().is_empty(),
            StepType::Http { method, url, .. } => !method.trim().is_empty() && !url.trim().is_empty(),
            StepType::Validate { condition } => !condition.trim().is_empty(),
            StepType::Template(t) => !t.source.trim().is_empty() && !t.destination.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub step_type: StepType,
    #[serde(default = "default_step_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_delay_secs: u64,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub condition: Option<String>,
}

fn default_step_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDefinition {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub step_type: StepType,
    #[serde(default = "default_step_timeout_secs")]
    pub timeout_secs: u64,
}

/// The declarative step graph a workflow executes (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default = "default_workflow_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub vars: HashMap<String, String>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub on_success: Vec<HookDefinition>,
    #[serde(default)]
    pub on_failure: Vec<HookDefinition>,
    #[serde(default)]
    pub on_cancel: Vec<HookDefinition>,
}

fn default_workflow_timeout_secs() -> u64 {
    1800
}

impl WorkflowDefinition {
    /// Unique step ids; type-required fields present (spec §4.3).
    /// Timeouts/retry counts are unsigned so "non-negative" is enforced by
    /// the type system.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::validation("workflow must declare at least one step"));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(Error::validation("step id must not be empty"));
            }
            if !seen.insert(step.id.clone()) {
                return Err(Error::validation(format!("duplicate step id: {}", step.id)));
            }
            if !step.step_type.required_fields_present() {
                return Err(Error::validation(format!("step {} is missing required fields for its type", step.id)));
            }
        }
        for hook in self.on_success.iter().chain(&self.on_failure).chain(&self.on_cancel) {
            if !hook.step_type.required_fields_present() {
                return Err(Error::validation(format!("hook {} is missing required fields for its type", hook.id)));
            }
        }
        Ok(())
    }
}

/// A versioned declarative workflow owned by a tenant (spec §3). `version`
/// increases monotonically on edit; only `Active` workflows are
/// dispatchable (invariant 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub definition: WorkflowDefinition,
    pub version: u32,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(tenant_id: Uuid, name: impl Into<String>, definition: WorkflowDefinition, now: DateTime<Utc>) -> Result<Self> {
        definition.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            definition,
            version: 1,
            status: WorkflowStatus::Draft,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn edit_definition(&mut self, definition: WorkflowDefinition, now: DateTime<Utc>) -> Result<()> {
        definition.validate()?;
        self.definition = definition;
        self.version += 1;
        self.updated_at = now;
        Ok(())
    }

    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status == WorkflowStatus::Deleted {
            return Err(Error::conflict("cannot activate a deleted workflow"));
        }
        self.status = WorkflowStatus::Active;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_dispatchable(&self) -> bool {
        self.status == WorkflowStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def_with_steps(ids: &[&str]) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "w".into(),
            timeout_secs: 1800,
            vars: HashMap::new(),
            steps: ids
                .iter()
                .map(|id| StepDefinition {
                    id: id.to_string(),
                    name: id.to_string(),
                    step_type: StepType::Command { command: "true".into(), args: vec![] },
                    timeout_secs: 300,
                    retry_count: 0,
                    retry_delay_secs: 0,
                    continue_on_error: false,
                    condition: None,
                })
                .collect(),
            on_success: vec![],
            on_failure: vec![],
            on_cancel: vec![],
        }
    }

    #[test]
    fn rejects_duplicate_step_ids() {
        let def = def_with_steps(&["a", "a"]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn accepts_unique_step_ids() {
        let def = def_with_steps(&["a", "b"]);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn edit_bumps_version_monotonically() {
        let now = Utc::now();
        let mut wf = Workflow::new(Uuid::new_v4(), "w", def_with_steps(&["a"]), now).expect("new");
        assert_eq!(wf.version, 1);
        wf.edit_definition(def_with_steps(&["a", "b"]), now).expect("edit");
        assert_eq!(wf.version, 2);
    }

    #[test]
    fn only_active_is_dispatchable() {
        let now = Utc::now();
        let wf = Workflow::new(Uuid::new_v4(), "w", def_with_steps(&["a"]), now).expect("new");
        assert!(!wf.is_dispatchable());
    }
}
