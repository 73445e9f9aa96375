use std::process::ExitStatus;

use tokio::process::Command;

use super::{StepContext, StepOutcome};

pub async fn run(command: &str, args: &[String], ctx: &StepContext) -> StepOutcome {
    let mut cmd = Command::new(command);
    cmd.args(args);
    apply_vars(&mut cmd, ctx);
    run_command(cmd).await
}

/// Runs `condition`/`validate` shell predicates and plain `shell`
/// invocations through `/bin/sh -c`, the way the script step's default
/// interpreter does.
pub async fn shell_status(expression: &str, ctx: &StepContext) -> std::io::Result<ExitStatus> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(expression);
    apply_vars(&mut cmd, ctx);
    cmd.status().await
}

fn apply_vars(cmd: &mut Command, ctx: &StepContext) {
    for (key, value) in ctx.merged_vars() {
        cmd.env(key, value);
    }
}

async fn run_command(mut cmd: Command) -> StepOutcome {
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    match cmd.output().await {
        Ok(output) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            let exit_code = output.status.code();
            if output.status.success() {
                StepOutcome::success(combined)
            } else {
                StepOutcome::failure(combined, exit_code)
            }
        }
        Err(err) => StepOutcome::failure(format!("failed to spawn process: {err}"), None),
    }
}
