use crate::api::{CommandApi, ComputeApi};
use crate::check::{parse_check_output, UpdateState};
use crate::command::CommandDriver;
use crate::updater::Documents;
use anyhow::{bail, Context};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What a completed machine run did to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The host reported `Idle` at apply time; nothing was sent.
    NoUpdate,
    /// The update was applied (if still pending) and the host rebooted into
    /// a healthy compute status.
    Rebooted,
}

/// Everything a machine run needs besides the target host.
pub struct MachineEnv<'a, 'b, M: CommandApi, E: ComputeApi> {
    pub driver: &'a CommandDriver<'b, M>,
    pub compute: &'a E,
    pub documents: &'a Documents,
    pub settle: Duration,
    pub cancel: &'a CancellationToken,
}

/// The per-host update pipeline as an explicit state machine.
///
/// The reboot document is deliberately sent without a completion waiter: the
/// host drops its agent connection while rebooting, so a waiter would only
/// ever time out. Post-reboot verification is the authoritative signal
/// instead.
#[derive(Debug, PartialEq, Eq)]
enum UpdateMachine {
    /// Re-check the update state; it may have moved since selection.
    Check,
    /// Ask the on-host tool to stage and activate the pending update.
    Apply,
    /// Send the reboot document and let the settle period pass.
    Reboot,
    /// Poll the compute platform until the host reports healthy.
    AwaitHealthy,
    Done(UpdateOutcome),
}

/// Drives one host through check → apply → reboot → healthy. Errors abort the
/// current host only; the caller decides what that means for the run.
pub async fn update_host<M: CommandApi, E: ComputeApi>(
    env: &MachineEnv<'_, '_, M, E>,
    compute_id: &str,
) -> anyhow::Result<UpdateOutcome> {
    let mut machine = UpdateMachine::Check;
    loop {
        machine = match machine {
            UpdateMachine::Done(outcome) => return Ok(outcome),
            state => state.step(env, compute_id).await?,
        };
    }
}

impl UpdateMachine {
    async fn step<M: CommandApi, E: ComputeApi>(
        self,
        env: &MachineEnv<'_, '_, M, E>,
        compute_id: &str,
    ) -> anyhow::Result<Self> {
        let targets = vec![compute_id.to_string()];
        match self {
            UpdateMachine::Check => {
                let command_id = env.driver.send(&targets, &env.documents.check).await?;
                let bytes = env.driver.result(&command_id, compute_id).await?;
                let output = parse_check_output(&bytes).with_context(|| {
                    format!(
                        "failed to parse check output {:?}",
                        String::from_utf8_lossy(&bytes)
                    )
                })?;
                debug!(compute_id, state = %output.update_state, "checked update state");
                match output.update_state {
                    UpdateState::Idle => Ok(UpdateMachine::Done(UpdateOutcome::NoUpdate)),
                    UpdateState::Available => Ok(UpdateMachine::Apply),
                    UpdateState::Ready => Ok(UpdateMachine::Reboot),
                    UpdateState::Staged => {
                        bail!("unexpected update state \"Staged\"; skipping host")
                    }
                    UpdateState::Other(state) => {
                        bail!("unknown update state {state:?}; skipping host")
                    }
                }
            }
            UpdateMachine::Apply => {
                env.driver.send(&targets, &env.documents.apply).await?;
                info!(compute_id, "update applied");
                Ok(UpdateMachine::Reboot)
            }
            UpdateMachine::Reboot => {
                env.driver.dispatch(&targets, &env.documents.reboot).await?;
                info!(
                    compute_id,
                    settle_secs = env.settle.as_secs(),
                    "reboot initiated, letting it progress before polling health"
                );
                tokio::select! {
                    _ = tokio::time::sleep(env.settle) => {}
                    _ = env.cancel.cancelled() => bail!("cancelled while waiting for reboot"),
                }
                Ok(UpdateMachine::AwaitHealthy)
            }
            UpdateMachine::AwaitHealthy => {
                env.compute
                    .wait_status_ok(compute_id, env.cancel)
                    .await
                    .context("failed to reach OK compute status after reboot")?;
                info!(compute_id, "host is back to OK compute status");
                Ok(UpdateMachine::Done(UpdateOutcome::Rebooted))
            }
            done @ UpdateMachine::Done(_) => Ok(done),
        }
    }
}
