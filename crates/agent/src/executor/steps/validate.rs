use super::{command, StepContext, StepOutcome};

pub async fn run(condition: &str, ctx: &StepContext) -> StepOutcome {
    match command::shell_status(condition, ctx).await {
        Ok(status) if status.success() => StepOutcome::success(format!("condition satisfied: {condition}")),
        Ok(status) => StepOutcome::failure(format!("condition failed: {condition}"), status.code()),
        Err(err) => StepOutcome::failure(format!("failed to evaluate condition: {err}"), None),
    }
}
