use crate::api::{CommandApi, WaitParams};
use anyhow::{anyhow, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The command service caps targets per send at 50.
pub const SEND_WINDOW: usize = 50;
/// Delivery timeout for a sent document.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(600);

/// Issues remote-script documents against sets of hosts and collects per-host
/// results.
pub struct CommandDriver<'a, M: CommandApi> {
    api: &'a M,
    wait: WaitParams,
    cancel: CancellationToken,
}

impl<'a, M: CommandApi> CommandDriver<'a, M> {
    pub fn new(api: &'a M, wait: WaitParams, cancel: CancellationToken) -> Self {
        Self { api, wait, cancel }
    }

    /// Sends `document` to the given hosts and awaits per-host execution with
    /// one concurrent waiter per target.
    ///
    /// Succeeds as long as at least one waiter succeeded: a command can
    /// legitimately finish on some hosts while others are mid-reboot and
    /// unreachable. The per-host result fetch that follows is the
    /// authoritative check for the stragglers.
    pub async fn send(&self, compute_ids: &[String], document: &str) -> Result<String> {
        let command_id = self
            .api
            .send(document, compute_ids, SEND_TIMEOUT)
            .await
            .with_context(|| format!("failed to send document {document:?}"))?;
        info!(
            command_id = command_id.as_str(),
            document,
            targets = compute_ids.len(),
            "document sent"
        );

        let (errors_tx, mut errors_rx) = mpsc::channel(compute_ids.len().max(1));
        let mut succeeded = 0usize;
        {
            let mut waiters: FuturesUnordered<_> = compute_ids
                .iter()
                .map(|compute_id| {
                    let errors_tx = errors_tx.clone();
                    let command_id = command_id.as_str();
                    async move {
                        match self
                            .api
                            .wait_executed(command_id, compute_id, self.wait, &self.cancel)
                            .await
                        {
                            Ok(()) => true,
                            Err(e) => {
                                warn!(
                                    compute_id = compute_id.as_str(),
                                    error = format!("{e:#}").as_str(),
                                    "failed awaiting document execution"
                                );
                                self.log_invocation(command_id, compute_id).await;
                                let _ = errors_tx.try_send(e);
                                false
                            }
                        }
                    }
                })
                .collect();

            while let Some(waiter_succeeded) = waiters.next().await {
                if waiter_succeeded {
                    succeeded += 1;
                }
            }
        }
        drop(errors_tx);

        if succeeded == 0 && !compute_ids.is_empty() {
            let mut last = None;
            while let Ok(e) = errors_rx.try_recv() {
                last = Some(e);
            }
            let last = last.unwrap_or_else(|| anyhow!("no waiter completed"));
            return Err(last.context("too many failures while awaiting document execution"));
        }
        Ok(command_id)
    }

    /// Issues a document without awaiting execution. Used for reboots, where
    /// the host drops its agent connection before a waiter could observe
    /// completion; post-reboot verification stands in for waiter success.
    pub async fn dispatch(&self, compute_ids: &[String], document: &str) -> Result<String> {
        self.api
            .send(document, compute_ids, SEND_TIMEOUT)
            .await
            .with_context(|| format!("failed to send document {document:?}"))
    }

    /// Fetches the stdout bytes of one host's invocation.
    pub async fn result(&self, command_id: &str, compute_id: &str) -> Result<Vec<u8>> {
        let invocation = self
            .api
            .get_invocation(command_id, compute_id)
            .await
            .context("failed to retrieve command invocation output")?;
        if invocation.status != "Success" {
            return Err(anyhow!(
                "command {command_id} has not reached success status, current status {:?}",
                invocation.status
            ));
        }
        Ok(invocation.stdout.into_bytes())
    }

    async fn log_invocation(&self, command_id: &str, compute_id: &str) {
        match self.api.get_invocation(command_id, compute_id).await {
            Ok(invocation) => error!(
                command_id,
                compute_id,
                status = invocation.status.as_str(),
                stdout = invocation.stdout.as_str(),
                "invocation state after waiter failure"
            ),
            Err(e) => debug!(
                command_id,
                compute_id,
                error = format!("{e:#}").as_str(),
                "could not fetch invocation after waiter failure"
            ),
        }
    }
}
