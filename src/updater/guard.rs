use crate::api::{ClusterApi, TaskFilter};
use anyhow::{bail, Context};

/// Environment variable the scheduler sets to our own task-definition
/// identifier; its presence enables the overlapping-run guard.
pub const TASK_DEFINITION_ARN_ENV: &str = "TASK_DEFINITION_ARN";

const RESOURCE_PREFIX: &str = "task-definition/";

/// Extracts the task-definition family from a fully-qualified identifier of
/// the form `arn:<partition>:<service>:<region>:<account>:task-definition/<family>:<revision>`.
pub fn task_definition_family(arn: &str) -> anyhow::Result<String> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" {
        bail!("not a valid resource identifier: {arn:?}");
    }
    let resource = parts[5];
    let task_definition = match resource.strip_prefix(RESOURCE_PREFIX) {
        Some(rest) => rest,
        None => bail!("not a task definition identifier: {arn:?}"),
    };
    let family = task_definition
        .split(':')
        .next()
        .unwrap_or_default();
    if family.is_empty() {
        bail!("task definition identifier has an empty family: {arn:?}");
    }
    Ok(family.to_string())
}

/// Whether another updater task of the same family is currently running in
/// the cluster. Our own task counts once, so anything above one means an
/// overlapping run.
pub async fn another_updater_running<C: ClusterApi>(
    api: &C,
    cluster: &str,
    family: &str,
) -> anyhow::Result<bool> {
    let tasks = api
        .list_tasks(cluster, &TaskFilter::Family(family.to_string()))
        .await
        .context("failed to list updater tasks")?;
    Ok(tasks.len() > 1)
}
