//! Per-step-type execution (spec §4.3). Each step type produces a
//! `StepOutcome`: interleaved stdout+stderr output, an exit code where
//! applicable, and whether the step actually changed anything (used by
//! the template step's idempotency report).

mod command;
mod file;
mod http_call;
mod script;
mod template;
mod validate;

use std::collections::HashMap;

use meridian_core::models::StepType;

/// Shared read-only context every step type executes against: template
/// bindings, dispatch parameters, and the HTTP client used for template
/// fetches and `http` steps.
pub struct StepContext {
    pub vars: HashMap<String, String>,
    pub parameters: HashMap<String, String>,
    pub http: reqwest::Client,
    pub control_base_url: String,
}

impl StepContext {
    /// Variables visible to template rendering and shell steps:
    /// dispatch parameters override workflow `vars`, matching the usual
    /// "more specific wins" precedence.
    pub fn merged_vars(&self) -> HashMap<String, String> {
        let mut merged = self.vars.clone();
        merged.extend(self.parameters.clone());
        merged
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub output: String,
    pub exit_code: Option<i32>,
    pub changed: bool,
}

impl StepOutcome {
    fn success(output: impl Into<String>) -> Self {
        Self { output: output.into(), exit_code: Some(0), changed: true }
    }

    fn failure(output: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self { output: output.into(), exit_code, changed: false }
    }
}

pub async fn execute(step_type: &StepType, ctx: &StepContext) -> StepOutcome {
    match step_type {
        StepType::Command { command, args } => command::run(command, args, ctx).await,
        StepType::Script { script, interpreter } => script::run(script, interpreter, ctx).await,
        StepType::File { path, content, absent } => file::run(path, content.as_deref(), *absent).await,
        StepType::Http { method, url, body, expect_status } => http_call::run(method, url, body.as_deref(), *expect_status, ctx).await,
        StepType::Validate { condition } => validate::run(condition, ctx).await,
        StepType::Template(template_step) => template::run(template_step, ctx).await,
    }
}

/// Evaluates a shell predicate: exit 0 means "run", non-zero means
/// "skip" (spec §4.3 step 2).
pub async fn evaluate_condition(condition: &str, ctx: &StepContext) -> bool {
    command::shell_status(condition, ctx).await.map(|status| status.success()).unwrap_or(false)
}
