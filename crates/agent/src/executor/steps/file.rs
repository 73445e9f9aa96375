use super::StepOutcome;

pub async fn run(path: &str, content: Option<&str>, absent: bool) -> StepOutcome {
    if absent {
        return match tokio::fs::remove_file(path).await {
            Ok(()) => StepOutcome::success(format!("removed {path}")),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StepOutcome { output: format!("{path} already absent"), exit_code: Some(0), changed: false },
            Err(err) => StepOutcome::failure(format!("failed to remove {path}: {err}"), None),
        };
    }

    let content = content.unwrap_or_default();
    match tokio::fs::write(path, content).await {
        Ok(()) => StepOutcome::success(format!("wrote {} bytes to {path}", content.len())),
        Err(err) => StepOutcome::failure(format!("failed to write {path}: {err}"), None),
    }
}
