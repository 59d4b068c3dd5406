pub mod discovery;
pub mod drain;
pub mod guard;
pub mod machine;
pub mod verify;

use crate::api::{ClusterApi, CommandApi, ComputeApi, WaitParams};
use crate::check;
use crate::command::CommandDriver;
use anyhow::Context;
use machine::MachineEnv;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use verify::VerifyOutcome;

/// A container host that advertises the Bottlerocket variant attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// The underlying VM identifier, targeted by documents and health checks.
    pub compute_id: String,
    /// The cluster's registration identifier, targeted by state transitions.
    pub member_id: String,
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.compute_id, self.member_id)
    }
}

/// A host whose last observed update state was `Available` or `Ready`.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub host: Host,
    /// Active image version at selection time, compared after the reboot.
    pub pre_update_version: String,
}

/// The named remote-script documents driving the on-host update tool.
#[derive(Debug, Clone)]
pub struct Documents {
    pub check: String,
    pub apply: String,
    pub reboot: String,
}

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Bounds for the command-execution and tasks-stopped waiters.
    pub wait: WaitParams,
    /// Pause between sending the reboot document and polling compute health,
    /// so an "OK" reported before the reboot begins is not mistaken for
    /// post-reboot health.
    pub reboot_settle: Duration,
    /// Our own task-definition identifier, when the scheduler provides it;
    /// enables the overlapping-run guard.
    pub task_definition_arn: Option<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            wait: WaitParams::default(),
            reboot_settle: Duration::from_secs(15),
            task_definition_arn: None,
        }
    }
}

/// Per-host outcomes of a run, keyed by compute id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary(BTreeMap<String, String>);

impl RunSummary {
    fn record(&mut self, compute_id: &str, outcome: impl Into<String>) {
        self.0.insert(compute_id.to_string(), outcome.into());
    }

    pub fn get(&self, compute_id: &str) -> Option<&str> {
        self.0.get(compute_id).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One-shot orchestrator for a single cluster. Discovers Bottlerocket hosts,
/// selects those with updates available, and walks them through
/// drain → update → reboot → reactivate → verify, strictly one host at a
/// time so service capacity is only ever reduced by one host.
pub struct Updater<C, M, E> {
    cluster: String,
    documents: Documents,
    config: UpdaterConfig,
    cluster_api: C,
    command_api: M,
    compute_api: E,
    cancel: CancellationToken,
}

impl<C, M, E> Updater<C, M, E>
where
    C: ClusterApi,
    M: CommandApi,
    E: ComputeApi,
{
    pub fn new(
        cluster: String,
        documents: Documents,
        cluster_api: C,
        command_api: M,
        compute_api: E,
        config: UpdaterConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cluster,
            documents,
            config,
            cluster_api,
            command_api,
            compute_api,
            cancel,
        }
    }

    /// Runs one update pass. Per-host failures are recorded in the summary
    /// and skipped; a host left in DRAINING that cannot be reactivated aborts
    /// the run, since a later pass cannot be trusted to find it.
    pub async fn run(&self) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::default();

        if self.another_run_in_progress().await? {
            info!("Another updater is running, therefore exiting this run");
            return Ok(summary);
        }

        let member_ids = discovery::list_active_hosts(&self.cluster_api, &self.cluster)
            .await
            .with_context(|| {
                format!("failed to get container hosts in cluster {:?}", self.cluster)
            })?;
        if member_ids.is_empty() {
            info!("Zero instances in the cluster");
            return Ok(summary);
        }

        let hosts = discovery::filter_target_os(&self.cluster_api, &self.cluster, &member_ids)
            .await
            .context("failed to filter Bottlerocket instances")?;
        if hosts.is_empty() {
            info!("No Bottlerocket instances detected");
            return Ok(summary);
        }

        let driver = CommandDriver::new(&self.command_api, self.config.wait, self.cancel.clone());
        let candidates = check::filter_updates_available(&driver, &hosts, &self.documents.check)
            .await
            .context("failed to check updates")?;
        if candidates.is_empty() {
            info!("No instances to update");
            return Ok(summary);
        }
        info!(
            candidates = format!("{candidates:?}").as_str(),
            "Instances ready for update"
        );

        let machine_env = MachineEnv {
            driver: &driver,
            compute: &self.compute_api,
            documents: &self.documents,
            settle: self.config.reboot_settle,
            cancel: &self.cancel,
        };

        for candidate in &candidates {
            if self.cancel.is_cancelled() {
                anyhow::bail!("run cancelled");
            }
            self.update_one(candidate, &driver, &machine_env, &mut summary)
                .await?;
        }

        info!("After action summary:");
        for (compute_id, outcome) in summary.iter() {
            info!(compute_id, outcome);
        }
        info!("Update operations complete!");
        Ok(summary)
    }

    /// Walks a single candidate through the update pipeline, recording its
    /// outcome. Only reactivation failures bubble up as run errors.
    async fn update_one(
        &self,
        candidate: &Candidate,
        driver: &CommandDriver<'_, M>,
        machine_env: &MachineEnv<'_, '_, M, E>,
        summary: &mut RunSummary,
    ) -> anyhow::Result<()> {
        let host = &candidate.host;

        match drain::eligible(&self.cluster_api, &self.cluster, &host.member_id).await {
            Err(e) => {
                warn!(
                    host = %host,
                    error = format!("{e:#}").as_str(),
                    "failed to determine update eligibility"
                );
                summary.record(
                    &host.compute_id,
                    format!("Failed to determine eligibility for update: {e:#}"),
                );
                return Ok(());
            }
            Ok(false) => {
                info!(host = %host, "host is not eligible for updates; it contains non-service tasks");
                summary.record(
                    &host.compute_id,
                    "Instance is not eligible for updates because it contains non-service task(s)",
                );
                return Ok(());
            }
            Ok(true) => info!(host = %host, "host is eligible for update"),
        }

        if let Err(e) = drain::drain(
            &self.cluster_api,
            &self.cluster,
            &host.member_id,
            self.config.wait,
            &self.cancel,
        )
        .await
        {
            warn!(host = %host, error = format!("{e:#}").as_str(), "failed to drain host");
            summary.record(&host.compute_id, format!("Failed to drain: {e:#}"));
            return Ok(());
        }
        info!(host = %host, "host successfully drained");

        let update_result = machine::update_host(machine_env, &host.compute_id).await;
        let activate_result =
            drain::activate(&self.cluster_api, &self.cluster, &host.member_id).await;
        match (update_result, activate_result) {
            (Err(update_err), Err(activate_err)) => {
                error!(
                    host = %host,
                    error = format!("{update_err:#}").as_str(),
                    "failed to update host"
                );
                return Err(activate_err.context(format!(
                    "host {host} failed to re-activate after failing to update"
                )));
            }
            (Err(update_err), Ok(())) => {
                warn!(
                    host = %host,
                    error = format!("{update_err:#}").as_str(),
                    "failed to update host"
                );
                summary.record(&host.compute_id, format!("Failed to update: {update_err:#}"));
                return Ok(());
            }
            (Ok(_), Err(activate_err)) => {
                return Err(
                    activate_err.context(format!("host {host} failed to re-activate after update"))
                );
            }
            (Ok(_), Ok(())) => {}
        }

        match verify::verify_update(
            driver,
            &self.documents.check,
            &host.compute_id,
            &candidate.pre_update_version,
        )
        .await
        {
            Err(e) => {
                error!(host = %host, error = format!("{e:#}").as_str(), "failed to verify update");
                summary.record(&host.compute_id, "Update failed");
            }
            Ok(VerifyOutcome::NotUpdated) => {
                warn!(host = %host, "update did not take effect");
                summary.record(&host.compute_id, "Update failed");
            }
            Ok(VerifyOutcome::Updated) => {
                info!(host = %host, "host updated successfully");
                summary.record(&host.compute_id, "Instance updated successfully");
            }
            Ok(VerifyOutcome::UpdatedNewerAvailable) => {
                info!(host = %host, "host updated successfully; a newer update is already available");
                summary.record(
                    &host.compute_id,
                    "Instance updated successfully; a newer update is already available",
                );
            }
        }
        Ok(())
    }

    /// The singleton guard: counts running tasks of our own task-definition
    /// family. An unparsable identifier downgrades to a logged skip; a listing
    /// failure aborts, since a concurrent run cannot be ruled out.
    async fn another_run_in_progress(&self) -> anyhow::Result<bool> {
        let arn = match &self.config.task_definition_arn {
            Some(arn) => arn,
            None => return Ok(false),
        };
        let family = match guard::task_definition_family(arn) {
            Ok(family) => family,
            Err(e) => {
                warn!(
                    error = format!("{e:#}").as_str(),
                    "failed to parse updater task definition identifier; skipping check for already running updater"
                );
                return Ok(false);
            }
        };
        info!(family = family.as_str(), "updater task definition family");
        guard::another_updater_running(&self.cluster_api, &self.cluster, &family)
            .await
            .context(
                "cannot determine running updater tasks, therefore stopping this run to avoid risk of multiple runs",
            )
    }
}
