use crate::api::{ClusterApi, HostState, TaskFilter, WaitParams};
use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Tasks started by the cluster's service controller carry this prefix in
/// `started_by`; they are restarted elsewhere when their host drains.
pub const SERVICE_TASK_PREFIX: &str = "ecs-svc/";

/// Reactivating an already-deregistered host fails with this reason, which
/// counts as success.
const INACTIVE_REASON: &str = "INACTIVE";

/// A host may be drained only if every running task was started by a service,
/// or it runs no tasks at all. Anything started by hand would be killed
/// without a restart.
pub async fn eligible<C: ClusterApi>(
    api: &C,
    cluster: &str,
    member_id: &str,
) -> anyhow::Result<bool> {
    let task_arns = api
        .list_tasks(cluster, &TaskFilter::Host(member_id.to_string()))
        .await
        .context("failed to list tasks")?;
    if task_arns.is_empty() {
        return Ok(true);
    }

    let tasks = api
        .describe_tasks(cluster, &task_arns)
        .await
        .context("failed to describe tasks")?;
    Ok(tasks.iter().all(|task| {
        task.started_by
            .as_deref()
            .unwrap_or_default()
            .starts_with(SERVICE_TASK_PREFIX)
    }))
}

/// Moves the host to DRAINING and waits for its tasks to stop. Every failure
/// path reactivates the host before reporting the error, so a skipped host is
/// never left out of service.
pub async fn drain<C: ClusterApi>(
    api: &C,
    cluster: &str,
    member_id: &str,
    wait: WaitParams,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let outcome = api
        .set_host_state(cluster, &[member_id.to_string()], HostState::Draining)
        .await
        .context("failed to change host state to DRAINING")?;
    if !outcome.failures.is_empty() {
        reactivate_after_failure(api, cluster, member_id).await;
        bail!(
            "host {member_id} failed to drain: {:?}",
            outcome.failures
        );
    }
    info!(member_id, "host state changed to DRAINING");

    if let Err(e) = wait_until_drained(api, cluster, member_id, wait, cancel).await {
        reactivate_after_failure(api, cluster, member_id).await;
        return Err(e);
    }
    Ok(())
}

async fn wait_until_drained<C: ClusterApi>(
    api: &C,
    cluster: &str,
    member_id: &str,
    wait: WaitParams,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let task_arns = api
        .list_tasks(cluster, &TaskFilter::Host(member_id.to_string()))
        .await
        .context("failed to identify tasks to wait on")?;
    if task_arns.is_empty() {
        return Ok(());
    }

    api.wait_tasks_stopped(cluster, &task_arns, wait, cancel)
        .await
        .context("failed to wait for tasks to stop")
}

async fn reactivate_after_failure<C: ClusterApi>(api: &C, cluster: &str, member_id: &str) {
    if let Err(e) = activate(api, cluster, member_id).await {
        error!(
            member_id,
            error = format!("{e:#}").as_str(),
            "host failed to reactivate after failing to drain"
        );
    }
}

/// Returns the host to ACTIVE. A per-host refusal with reason `INACTIVE`
/// means the host deregistered in the meantime and is treated as success.
pub async fn activate<C: ClusterApi>(
    api: &C,
    cluster: &str,
    member_id: &str,
) -> anyhow::Result<()> {
    let outcome = api
        .set_host_state(cluster, &[member_id.to_string()], HostState::Active)
        .await
        .context("failed to change host state to ACTIVE")?;
    let failures: Vec<_> = outcome
        .failures
        .into_iter()
        .filter(|failure| failure.reason != INACTIVE_REASON)
        .collect();
    if !failures.is_empty() {
        bail!("API failures while activating: {failures:?}");
    }
    info!(member_id, "host state changed to ACTIVE");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{refused, ClusterCall, FakeClusterApi};
    use crate::api::TaskDescription;

    fn task(started_by: Option<&str>) -> TaskDescription {
        TaskDescription {
            arn: "task-arn-1".into(),
            started_by: started_by.map(String::from),
            last_status: None,
        }
    }

    #[tokio::test]
    async fn eligible_with_only_service_tasks() {
        let api = FakeClusterApi::default();
        api.task_lists.push_ok(vec!["task-arn-1".into()]);
        api.task_descriptions
            .push_ok(vec![task(Some("ecs-svc/svc-id"))]);

        assert!(eligible(&api, "test-cluster", "cont-inst-id").await.unwrap());
    }

    #[tokio::test]
    async fn eligible_with_no_tasks() {
        let api = FakeClusterApi::default();
        api.task_lists.push_ok(vec![]);

        assert!(eligible(&api, "test-cluster", "cont-inst-id").await.unwrap());
        // no describe call when the task list is empty
        assert_eq!(
            api.calls.lock().unwrap().as_slice(),
            &[ClusterCall::ListTasks(TaskFilter::Host(
                "cont-inst-id".into()
            ))]
        );
    }

    #[tokio::test]
    async fn ineligible_with_standalone_task() {
        let api = FakeClusterApi::default();
        api.task_lists.push_ok(vec!["task-arn-1".into()]);
        api.task_descriptions
            .push_ok(vec![task(Some("standalone-task-id"))]);

        assert!(!eligible(&api, "test-cluster", "cont-inst-id").await.unwrap());
    }

    #[tokio::test]
    async fn ineligible_with_missing_started_by() {
        let api = FakeClusterApi::default();
        api.task_lists.push_ok(vec!["task-arn-1".into()]);
        api.task_descriptions.push_ok(vec![task(None)]);

        assert!(!eligible(&api, "test-cluster", "cont-inst-id").await.unwrap());
    }

    #[tokio::test]
    async fn ineligible_with_mixed_tasks() {
        let api = FakeClusterApi::default();
        api.task_lists
            .push_ok(vec!["task-arn-1".into(), "task-arn-2".into()]);
        api.task_descriptions.push_ok(vec![
            task(Some("standalone-task-id")),
            task(Some("ecs-svc/svc-id")),
        ]);

        assert!(!eligible(&api, "test-cluster", "cont-inst-id").await.unwrap());
    }

    #[tokio::test]
    async fn eligibility_errors_propagate() {
        let api = FakeClusterApi::default();
        api.task_lists.push_err("failed to list tasks");

        let err = eligible(&api, "test-cluster", "cont-inst-id")
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("failed to list tasks"));
    }

    #[tokio::test]
    async fn drain_with_no_tasks() {
        let api = FakeClusterApi::default();
        api.state_changes.push_ok(Default::default());
        api.task_lists.push_ok(vec![]);

        drain(
            &api,
            "test-cluster",
            "cont-inst-id",
            WaitParams::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(api.state_transitions(), vec![HostState::Draining]);
    }

    #[tokio::test]
    async fn drain_waits_for_running_tasks() {
        let api = FakeClusterApi::default();
        api.state_changes.push_ok(Default::default());
        api.task_lists.push_ok(vec!["task-arn-1".into()]);
        api.stop_waits.push_ok(());

        drain(
            &api,
            "test-cluster",
            "cont-inst-id",
            WaitParams::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(api.state_transitions(), vec![HostState::Draining]);
        assert!(api
            .calls
            .lock()
            .unwrap()
            .contains(&ClusterCall::WaitTasksStopped(vec!["task-arn-1".into()])));
    }

    #[tokio::test]
    async fn drain_reactivates_on_response_failures() {
        let api = FakeClusterApi::default();
        api.state_changes
            .push_ok(refused(&["cont-inst-id"], "failed"));
        api.state_changes.push_ok(Default::default());

        let err = drain(
            &api,
            "test-cluster",
            "cont-inst-id",
            WaitParams::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(format!("{err}").contains("failed to drain"));
        assert_eq!(
            api.state_transitions(),
            vec![HostState::Draining, HostState::Active]
        );
    }

    #[tokio::test]
    async fn drain_reactivates_when_task_listing_fails() {
        let api = FakeClusterApi::default();
        api.state_changes.push_ok(Default::default());
        api.task_lists.push_err("failed to list tasks");

        let err = drain(
            &api,
            "test-cluster",
            "cont-inst-id",
            WaitParams::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(format!("{err:#}").contains("failed to identify tasks to wait on"));
        assert_eq!(
            api.state_transitions(),
            vec![HostState::Draining, HostState::Active]
        );
    }

    #[tokio::test]
    async fn drain_reactivates_on_wait_timeout() {
        let api = FakeClusterApi::default();
        api.state_changes.push_ok(Default::default());
        api.task_lists.push_ok(vec!["task-arn-1".into()]);
        api.stop_waits.push_err("exceeded max attempts");

        let err = drain(
            &api,
            "test-cluster",
            "cont-inst-id",
            WaitParams::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(format!("{err:#}").contains("failed to wait for tasks to stop"));
        assert_eq!(
            api.state_transitions(),
            vec![HostState::Draining, HostState::Active]
        );
    }

    #[tokio::test]
    async fn activate_success() {
        let api = FakeClusterApi::default();
        api.state_changes.push_ok(Default::default());

        activate(&api, "test-cluster", "cont-inst-id").await.unwrap();
    }

    #[tokio::test]
    async fn activate_treats_inactive_reason_as_success() {
        let api = FakeClusterApi::default();
        api.state_changes
            .push_ok(refused(&["cont-inst-id"], "INACTIVE"));

        activate(&api, "test-cluster", "cont-inst-id").await.unwrap();
    }

    #[tokio::test]
    async fn activate_fails_on_other_reasons() {
        let api = FakeClusterApi::default();
        api.state_changes.push_ok(refused(&["cont-inst-id"], "OTHER"));

        let err = activate(&api, "test-cluster", "cont-inst-id")
            .await
            .unwrap_err();

        assert!(format!("{err}").contains("API failures while activating"));
        assert!(format!("{err}").contains("OTHER"));
    }

    #[tokio::test]
    async fn activate_propagates_transport_errors() {
        let api = FakeClusterApi::default();
        api.state_changes.push_err("failed to activate");

        let err = activate(&api, "test-cluster", "cont-inst-id")
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("failed to activate"));
    }
}
