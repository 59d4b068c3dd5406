//! Full-run scenarios against the in-memory control-plane fakes.

use bottlerocket_cluster_updater::api::mock::{
    host_description, refused, ClusterCall, FakeClusterApi, FakeCommandApi, FakeComputeApi,
};
use bottlerocket_cluster_updater::api::{HostState, TaskDescription, TaskFilter, WaitParams};
use bottlerocket_cluster_updater::updater::{Documents, Updater, UpdaterConfig};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const VARIANT_ATTRIBUTE: &str = "bottlerocket.variant";

fn check_output(state: &str, version: &str) -> String {
    format!(
        r#"{{"update_state": "{state}", "active_partition": {{ "image": {{ "version": "{version}"}}}}}}"#
    )
}

struct Harness {
    cluster: FakeClusterApi,
    command: FakeCommandApi,
    compute: FakeComputeApi,
    config: UpdaterConfig,
}

impl Harness {
    fn new() -> Self {
        Self {
            cluster: FakeClusterApi::default(),
            command: FakeCommandApi::default(),
            compute: FakeComputeApi::default(),
            config: UpdaterConfig {
                wait: WaitParams {
                    attempts: 3,
                    delay: Duration::from_millis(1),
                },
                reboot_settle: Duration::ZERO,
                task_definition_arn: None,
            },
        }
    }

    /// One Bottlerocket host with no running tasks, drainable and healthy.
    fn with_single_quiet_host(self) -> Self {
        self.cluster.hosts.push_ok(vec!["cont-inst-1".into()]);
        self.cluster.descriptions.push_ok(vec![host_description(
            "cont-inst-1",
            "inst-1",
            VARIANT_ATTRIBUTE,
        )]);
        self.cluster.task_lists.push_ok(vec![]);
        self.cluster.state_changes.push_ok(Default::default());
        self
    }

    fn updater(&self) -> Updater<FakeClusterApi, FakeCommandApi, FakeComputeApi> {
        Updater::new(
            "test-cluster".into(),
            Documents {
                check: "check-document".into(),
                apply: "apply-document".into(),
                reboot: "reboot-document".into(),
            },
            self.cluster.clone(),
            self.command.clone(),
            self.compute.clone(),
            self.config.clone(),
            CancellationToken::new(),
        )
    }
}

#[tokio::test]
async fn no_hosts_in_the_cluster() {
    let harness = Harness::new();
    harness.cluster.hosts.push_ok(vec![]);

    let summary = harness.updater().run().await.unwrap();

    assert!(summary.is_empty());
    assert_eq!(
        harness.cluster.calls.lock().unwrap().as_slice(),
        &[ClusterCall::ListHosts]
    );
}

#[tokio::test]
async fn no_bottlerocket_hosts() {
    let harness = Harness::new();
    harness.cluster.hosts.push_ok(vec!["cont-inst-1".into()]);
    harness.cluster.descriptions.push_ok(vec![host_description(
        "cont-inst-1",
        "inst-1",
        "different-attribute",
    )]);

    let summary = harness.updater().run().await.unwrap();

    assert!(summary.is_empty());
    assert!(harness.command.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn available_update_runs_the_whole_pipeline() {
    let harness = Harness::new().with_single_quiet_host();
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Available", "0.0.0"));
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Available", "0.0.0"));
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Idle", "0.0.1"));

    let summary = harness.updater().run().await.unwrap();

    assert_eq!(summary.get("inst-1"), Some("Instance updated successfully"));
    assert_eq!(
        harness.command.sent_documents(),
        vec![
            "check-document",
            "check-document",
            "apply-document",
            "reboot-document",
            "check-document",
        ]
    );
    assert_eq!(
        harness.cluster.state_transitions(),
        vec![HostState::Draining, HostState::Active]
    );
    assert_eq!(
        harness.compute.waited.lock().unwrap().as_slice(),
        &["inst-1".to_string()]
    );
}

#[tokio::test]
async fn ready_update_skips_the_apply_step() {
    let harness = Harness::new().with_single_quiet_host();
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Ready", "0.0.0"));
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Ready", "0.0.0"));
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Idle", "0.0.1"));

    let summary = harness.updater().run().await.unwrap();

    assert_eq!(summary.get("inst-1"), Some("Instance updated successfully"));
    assert_eq!(
        harness.command.sent_documents(),
        vec![
            "check-document",
            "check-document",
            "reboot-document",
            "check-document",
        ]
    );
}

#[tokio::test]
async fn host_with_standalone_task_is_skipped() {
    let harness = Harness::new();
    harness.cluster.hosts.push_ok(vec!["cont-inst-1".into()]);
    harness.cluster.descriptions.push_ok(vec![host_description(
        "cont-inst-1",
        "inst-1",
        VARIANT_ATTRIBUTE,
    )]);
    harness.cluster.task_lists.push_ok(vec!["task-arn-1".into()]);
    harness.cluster.task_descriptions.push_ok(vec![TaskDescription {
        arn: "task-arn-1".into(),
        started_by: Some("standalone".into()),
        last_status: None,
    }]);
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Available", "0.0.0"));

    let summary = harness.updater().run().await.unwrap();

    assert_eq!(
        summary.get("inst-1"),
        Some("Instance is not eligible for updates because it contains non-service task(s)")
    );
    // draining was never requested
    assert!(harness.cluster.state_transitions().is_empty());
}

#[tokio::test]
async fn drain_timeout_reactivates_and_continues() {
    let harness = Harness::new();
    harness.cluster.hosts.push_ok(vec!["cont-inst-1".into()]);
    harness.cluster.descriptions.push_ok(vec![host_description(
        "cont-inst-1",
        "inst-1",
        VARIANT_ATTRIBUTE,
    )]);
    harness.cluster.task_lists.push_ok(vec!["task-arn-1".into()]);
    harness.cluster.task_descriptions.push_ok(vec![TaskDescription {
        arn: "task-arn-1".into(),
        started_by: Some("ecs-svc/svc-id".into()),
        last_status: None,
    }]);
    harness.cluster.state_changes.push_ok(Default::default());
    harness.cluster.stop_waits.push_err("exceeded max attempts");
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Available", "0.0.0"));

    let summary = harness.updater().run().await.unwrap();

    let outcome = summary.get("inst-1").unwrap();
    assert!(outcome.starts_with("Failed to drain"), "got {outcome:?}");
    assert_eq!(
        harness.cluster.state_transitions(),
        vec![HostState::Draining, HostState::Active]
    );
    // the update machine never ran
    assert_eq!(harness.command.sent_documents(), vec!["check-document"]);
}

#[tokio::test]
async fn unchanged_version_after_reboot_is_reported_non_fatal() {
    let harness = Harness::new().with_single_quiet_host();
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Available", "0.0.0"));
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Available", "0.0.0"));
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Idle", "0.0.0"));

    let summary = harness.updater().run().await.unwrap();

    assert_eq!(summary.get("inst-1"), Some("Update failed"));
    assert_eq!(
        harness.cluster.state_transitions(),
        vec![HostState::Draining, HostState::Active]
    );
}

#[tokio::test]
async fn updated_host_reporting_a_newer_update() {
    let harness = Harness::new().with_single_quiet_host();
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Available", "0.0.0"));
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Available", "0.0.0"));
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Available", "0.0.1"));

    let summary = harness.updater().run().await.unwrap();

    assert_eq!(
        summary.get("inst-1"),
        Some("Instance updated successfully; a newer update is already available")
    );
}

#[tokio::test]
async fn singleton_guard_exits_before_any_other_call() {
    let mut harness = Harness::new();
    harness.config.task_definition_arn =
        Some("arn:aws:ecs:us-west-2:1234567:task-definition/updater-family:1".into());
    harness
        .cluster
        .task_lists
        .push_ok(vec!["task-arn-1".into(), "task-arn-2".into()]);

    let summary = harness.updater().run().await.unwrap();

    assert!(summary.is_empty());
    assert_eq!(
        harness.cluster.calls.lock().unwrap().as_slice(),
        &[ClusterCall::ListTasks(TaskFilter::Family(
            "updater-family".into()
        ))]
    );
    assert!(harness.command.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unparsable_task_definition_arn_skips_the_guard() {
    let mut harness = Harness::new();
    harness.config.task_definition_arn = Some("not-an-arn".into());
    harness.cluster.hosts.push_ok(vec![]);

    let summary = harness.updater().run().await.unwrap();

    assert!(summary.is_empty());
    // the guard was skipped and the run proceeded to the host listing
    assert_eq!(
        harness.cluster.calls.lock().unwrap().as_slice(),
        &[ClusterCall::ListHosts]
    );
}

#[tokio::test]
async fn guard_listing_failure_is_fatal() {
    let mut harness = Harness::new();
    harness.config.task_definition_arn =
        Some("arn:aws:ecs:us-west-2:1234567:task-definition/updater-family:1".into());
    harness.cluster.task_lists.push_err("failed to list task");

    let err = harness.updater().run().await.unwrap_err();

    assert!(format!("{err:#}").contains("cannot determine running updater tasks"));
}

#[tokio::test]
async fn one_failed_check_window_limits_candidates_to_the_other() {
    let harness = Harness::new();
    let member_ids: Vec<String> = (0..100).map(|i| format!("cont-inst-{i}")).collect();
    harness.cluster.hosts.push_ok(member_ids.clone());
    harness.cluster.descriptions.push_ok(
        member_ids
            .iter()
            .enumerate()
            .map(|(i, id)| host_description(id, &format!("inst-{i}"), VARIANT_ATTRIBUTE))
            .collect(),
    );
    harness.cluster.task_lists.push_ok(vec![]);
    harness.cluster.state_changes.push_ok(Default::default());
    // first command window fails to send, second goes through
    harness.command.send_results.push_err("Failed to send document");
    harness.command.send_results.push_ok("command-id".into());
    for i in 50..100 {
        let id = format!("inst-{i}");
        harness
            .command
            .script_invocation(&id, "Success", &check_output("Available", "0.0.0"));
        harness
            .command
            .script_invocation(&id, "Success", &check_output("Available", "0.0.0"));
        harness
            .command
            .script_invocation(&id, "Success", &check_output("Idle", "0.0.1"));
    }

    let summary = harness.updater().run().await.unwrap();

    assert_eq!(summary.len(), 50);
    for i in 50..100 {
        assert_eq!(
            summary.get(&format!("inst-{i}")),
            Some("Instance updated successfully")
        );
    }
}

#[tokio::test]
async fn reactivation_failure_after_update_failure_is_fatal() {
    let harness = Harness::new();
    harness.cluster.hosts.push_ok(vec!["cont-inst-1".into()]);
    harness.cluster.descriptions.push_ok(vec![host_description(
        "cont-inst-1",
        "inst-1",
        VARIANT_ATTRIBUTE,
    )]);
    harness.cluster.task_lists.push_ok(vec![]);
    // drain succeeds, the later reactivation is refused
    harness.cluster.state_changes.push_ok(Default::default());
    harness
        .cluster
        .state_changes
        .push_ok(refused(&["cont-inst-1"], "OTHER"));
    // selection sees an update, the machine then trips over a staged state
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Available", "0.0.0"));
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Staged", "0.0.0"));

    let err = harness.updater().run().await.unwrap_err();

    assert!(format!("{err:#}").contains("failed to re-activate after failing to update"));
}

#[tokio::test]
async fn staged_state_skips_the_host_but_not_the_run() {
    let harness = Harness::new().with_single_quiet_host();
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Available", "0.0.0"));
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Staged", "0.0.0"));

    let summary = harness.updater().run().await.unwrap();

    let outcome = summary.get("inst-1").unwrap();
    assert!(outcome.starts_with("Failed to update"), "got {outcome:?}");
    assert!(outcome.contains("unexpected update state \"Staged\""));
    assert_eq!(
        harness.cluster.state_transitions(),
        vec![HostState::Draining, HostState::Active]
    );
}

#[tokio::test]
async fn runs_are_idempotent_when_no_updates_are_pending() {
    let harness = Harness::new();
    harness.cluster.hosts.push_ok(vec!["cont-inst-1".into()]);
    harness.cluster.descriptions.push_ok(vec![host_description(
        "cont-inst-1",
        "inst-1",
        VARIANT_ATTRIBUTE,
    )]);
    harness
        .command
        .script_invocation("inst-1", "Success", &check_output("Idle", "0.0.1"));

    for _ in 0..2 {
        let summary = harness.updater().run().await.unwrap();
        assert!(summary.is_empty());
    }
    // never a single state transition across both runs
    assert!(harness.cluster.state_transitions().is_empty());
}
