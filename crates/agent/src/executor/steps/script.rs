use std::io::Write;

use tokio::process::Command;

use super::{StepContext, StepOutcome};

/// Writes `script` to a temp file and executes it with `interpreter`.
/// The file is marked executable-by-owner on unix so interpreters that
/// exec it directly (shebang scripts) work the same as ones invoked
/// `interpreter script.sh`.
pub async fn run(script: &str, interpreter: &str, ctx: &StepContext) -> StepOutcome {
    let mut file = match tempfile::NamedTempFile::new() {
        Ok(file) => file,
        Err(err) => return StepOutcome::failure(format!("failed to create script temp file: {err}"), None),
    };
    if let Err(err) = file.write_all(script.as_bytes()) {
        return StepOutcome::failure(format!("failed to write script temp file: {err}"), None);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(err) = std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o700)) {
            return StepOutcome::failure(format!("failed to chmod script temp file: {err}"), None);
        }
    }

    let mut cmd = Command::new(interpreter);
    cmd.arg(file.path());
    for (key, value) in ctx.merged_vars() {
        cmd.env(key, value);
    }
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    match cmd.output().await {
        Ok(output) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            if output.status.success() {
                StepOutcome::success(combined)
            } else {
                StepOutcome::failure(combined, output.status.code())
            }
        }
        Err(err) => StepOutcome::failure(format!("failed to spawn interpreter: {err}"), None),
    }
}
