//! Template step (spec §4.3): fetch, render, and atomically deploy a
//! file. The one step type the spec singles out as "worth calling out".

use std::collections::HashMap;
use std::path::Path;

use meridian_core::models::TemplateStep;
use sha2::{Digest, Sha256};

use super::{StepContext, StepOutcome};

pub async fn run(step: &TemplateStep, ctx: &StepContext) -> StepOutcome {
    let raw = match fetch_source(&step.source, ctx).await {
        Ok(raw) => raw,
        Err(err) => return StepOutcome::failure(format!("failed to fetch template source: {err}"), None),
    };

    let mut bindings = ctx.merged_vars();
    bindings.extend(step.vars.clone());
    bindings.extend(system_facts());

    let rendered = render(&raw, &bindings);

    let existing = tokio::fs::read(&step.destination).await.ok();
    if let Some(existing) = &existing {
        if sha256_hex(existing) == sha256_hex(rendered.as_bytes()) {
            return StepOutcome { output: format!("{} unchanged", step.destination), exit_code: Some(0), changed: false };
        }
    }

    if step.backup {
        if let Some(existing) = &existing {
            let backup_path = format!("{}.bak", step.destination);
            if let Err(err) = tokio::fs::write(&backup_path, existing).await {
                return StepOutcome::failure(format!("failed to write backup {backup_path}: {err}"), None);
            }
        }
    }

    if let Err(err) = atomic_deploy(&step.destination, rendered.as_bytes(), step).await {
        return StepOutcome::failure(format!("failed to deploy {}: {err}", step.destination), None);
    }

    StepOutcome::success(format!("{} deployed", step.destination))
}

async fn fetch_source(source: &str, ctx: &StepContext) -> anyhow::Result<String> {
    if let Some(template_id) = source.strip_prefix("control-plane://templates/") {
        let url = format!("{}/api/v1/templates/{template_id}", ctx.control_base_url.trim_end_matches('/'));
        Ok(ctx.http.get(url).send().await?.error_for_status()?.text().await?)
    } else {
        Ok(ctx.http.get(source).send().await?.error_for_status()?.text().await?)
    }
}

/// Minimal `{{key}}` substitution — the agent ships no templating
/// engine dependency, and the step contract only requires variable
/// interpolation, not control flow.
fn render(raw: &str, bindings: &HashMap<String, String>) -> String {
    let mut rendered = raw.to_string();
    for (key, value) in bindings {
        rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
    }
    rendered
}

fn system_facts() -> HashMap<String, String> {
    let mut facts = HashMap::new();
    facts.insert("os".to_string(), std::env::consts::OS.to_string());
    facts.insert("arch".to_string(), std::env::consts::ARCH.to_string());
    if let Ok(hostname) = std::env::var("HOSTNAME") {
        facts.insert("hostname".to_string(), hostname);
    }
    facts
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write-to-tempfile-in-same-directory, fsync, rename (spec §4.3).
async fn atomic_deploy(destination: &str, content: &[u8], step: &TemplateStep) -> anyhow::Result<()> {
    let destination = destination.to_string();
    let content = content.to_vec();
    let mode = step.mode;
    let owner = step.owner.clone();
    let group = step.group.clone();

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        use std::io::Write;

        let dest_path = Path::new(&destination);
        let parent = dest_path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(mode))?;
        }

        tmp.persist(&dest_path)?;

        #[cfg(unix)]
        if owner.is_some() || group.is_some() {
            let mut args = vec![];
            let spec = match (&owner, &group) {
                (Some(owner), Some(group)) => format!("{owner}:{group}"),
                (Some(owner), None) => owner.clone(),
                (None, Some(group)) => format!(":{group}"),
                (None, None) => String::new(),
            };
            args.push(spec);
            args.push(destination.clone());
            let status = std::process::Command::new("chown").args(&args).status()?;
            if !status.success() {
                anyhow::bail!("chown exited with {status}");
            }
        }

        Ok(())
    })
    .await??;

    Ok(())
}
