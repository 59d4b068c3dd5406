use crate::api::ComputeApi;
use crate::control_plane::request::get;
use crate::control_plane::Client;
use anyhow::bail;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const STATUS_OK: &str = "ok";
// The compute platform exposes no caller override for this waiter; these are
// the client's own defaults.
const OK_WAIT_ATTEMPTS: u32 = 40;
const OK_WAIT_DELAY: Duration = Duration::from_secs(15);

#[async_trait]
impl ComputeApi for Client {
    async fn wait_status_ok(
        &self,
        compute_id: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let path = format!("/v1/compute/{compute_id}/status");
        for attempt in 1..=OK_WAIT_ATTEMPTS {
            let status: String = get(
                &self.http_client,
                &self.config,
                &path,
                "/status",
                HashMap::new(),
            )
            .await?;
            if status.eq_ignore_ascii_case(STATUS_OK) {
                return Ok(());
            }
            debug!(
                compute_id,
                attempt,
                status = status.as_str(),
                "instance status not yet OK"
            );

            tokio::select! {
                _ = tokio::time::sleep(OK_WAIT_DELAY) => {}
                _ = cancel.cancelled() => bail!("cancelled while waiting for OK instance status"),
            }
        }
        bail!(
            "instance {compute_id} did not reach OK status within {OK_WAIT_ATTEMPTS} attempts"
        )
    }
}
