use crate::api::{CommandApi, CommandInvocation, WaitParams};
use crate::control_plane::request::{get, post};
use crate::control_plane::Client;
use anyhow::bail;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Documents are always issued at the version the service marks as default.
const DEFAULT_DOCUMENT_VERSION: &str = "$DEFAULT";
const SUCCESS_STATUS: &str = "Success";
/// Invocation statuses that mean the command has not finished yet.
const PENDING_STATUSES: &[&str] = &["Pending", "InProgress", "Delayed"];

#[derive(Serialize)]
struct SendCommandRequest<'a> {
    document: &'a str,
    version: &'a str,
    compute_ids: &'a [String],
    timeout_secs: u64,
}

#[async_trait]
impl CommandApi for Client {
    async fn send(
        &self,
        document: &str,
        compute_ids: &[String],
        timeout: Duration,
    ) -> anyhow::Result<String> {
        let command_id = post(
            &self.http_client,
            &self.config,
            "/v1/commands",
            &SendCommandRequest {
                document,
                version: DEFAULT_DOCUMENT_VERSION,
                compute_ids,
                timeout_secs: timeout.as_secs(),
            },
            Some("/command/command_id"),
            HashMap::new(),
        )
        .await?;
        Ok(command_id)
    }

    async fn get_invocation(
        &self,
        command_id: &str,
        compute_id: &str,
    ) -> anyhow::Result<CommandInvocation> {
        let path = format!("/v1/commands/{command_id}/invocations/{compute_id}");
        let invocation = get(
            &self.http_client,
            &self.config,
            &path,
            "/invocation",
            HashMap::new(),
        )
        .await?;
        Ok(invocation)
    }

    async fn wait_executed(
        &self,
        command_id: &str,
        compute_id: &str,
        wait: WaitParams,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        for attempt in 1..=wait.attempts {
            let invocation = self.get_invocation(command_id, compute_id).await?;
            if invocation.status == SUCCESS_STATUS {
                return Ok(());
            }
            if !PENDING_STATUSES.contains(&invocation.status.as_str()) {
                bail!(
                    "command {command_id} reached terminal status {:?} on {compute_id}",
                    invocation.status
                );
            }
            debug!(
                command_id,
                compute_id,
                attempt,
                status = invocation.status.as_str(),
                "command still executing"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait.delay) => {}
                _ = cancel.cancelled() => bail!("cancelled while waiting for command execution"),
            }
        }
        bail!(
            "exceeded {} attempts waiting for command {command_id} on {compute_id}",
            wait.attempts
        )
    }
}
