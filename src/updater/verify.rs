use crate::api::CommandApi;
use crate::check::{parse_check_output, UpdateState};
use crate::command::CommandDriver;
use anyhow::Context;

/// Result of comparing the post-reboot active version with the version
/// observed at selection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Updated,
    /// The version changed, but the host already reports another update
    /// available; a release landed while this run was in flight.
    UpdatedNewerAvailable,
    NotUpdated,
}

/// Re-runs the check document after the reboot and compares the reported
/// active version against `pre_update_version`.
pub async fn verify_update<M: CommandApi>(
    driver: &CommandDriver<'_, M>,
    check_document: &str,
    compute_id: &str,
    pre_update_version: &str,
) -> anyhow::Result<VerifyOutcome> {
    let targets = vec![compute_id.to_string()];
    let command_id = driver.send(&targets, check_document).await?;
    let bytes = driver.result(&command_id, compute_id).await?;
    let output = parse_check_output(&bytes).with_context(|| {
        format!(
            "failed to parse command output {:?}, manual verification required",
            String::from_utf8_lossy(&bytes)
        )
    })?;

    if output.active_version() == pre_update_version {
        return Ok(VerifyOutcome::NotUpdated);
    }
    if output.update_state == UpdateState::Available {
        return Ok(VerifyOutcome::UpdatedNewerAvailable);
    }
    Ok(VerifyOutcome::Updated)
}
