pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Registration lifecycle states a container host can be moved between.
/// DRAINING stops new task placement and lets existing work exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostState {
    Active,
    Draining,
}

impl HostState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Active => "ACTIVE",
            HostState::Draining => "DRAINING",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostAttribute {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDescription {
    pub member_id: String,
    pub compute_id: String,
    #[serde(default)]
    pub attributes: Vec<HostAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
}

/// Per-host failure reported in a response body rather than as a transport
/// error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFailure {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateChangeOutcome {
    #[serde(default)]
    pub failures: Vec<ApiFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescription {
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFilter {
    /// Tasks placed on a specific host.
    Host(String),
    /// Tasks launched from a specific task-definition family.
    Family(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub status: String,
    #[serde(default)]
    pub stdout: String,
}

/// Bounds for a polling waiter. The defaults give every bounded wait in a run
/// a ceiling of roughly 25 minutes.
#[derive(Debug, Clone, Copy)]
pub struct WaitParams {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for WaitParams {
    fn default() -> Self {
        Self {
            attempts: 100,
            delay: Duration::from_secs(15),
        }
    }
}

/// Cluster control-plane operations: host registration, task inventory, and
/// host state transitions.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Lists the cluster member ids of all hosts in ACTIVE registration
    /// status, walking every page.
    async fn list_hosts(&self, cluster: &str) -> anyhow::Result<Vec<String>>;

    /// Describes up to 100 hosts by cluster member id.
    async fn describe_hosts(
        &self,
        cluster: &str,
        member_ids: &[String],
    ) -> anyhow::Result<Vec<HostDescription>>;

    /// Moves hosts to the requested registration state. Per-host refusals come
    /// back in the outcome body, not as an error.
    async fn set_host_state(
        &self,
        cluster: &str,
        member_ids: &[String],
        state: HostState,
    ) -> anyhow::Result<StateChangeOutcome>;

    async fn list_tasks(&self, cluster: &str, filter: &TaskFilter) -> anyhow::Result<Vec<String>>;

    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> anyhow::Result<Vec<TaskDescription>>;

    /// Waits until every given task has stopped, polling within the caller's
    /// bounds and aborting promptly on cancellation.
    async fn wait_tasks_stopped(
        &self,
        cluster: &str,
        task_arns: &[String],
        wait: WaitParams,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Remote-script command service: runs named documents on hosts and exposes
/// per-host invocation results.
#[async_trait]
pub trait CommandApi: Send + Sync {
    /// Issues a document at its default version against up to 50 hosts,
    /// returning the command id. `timeout` bounds delivery, not execution.
    async fn send(
        &self,
        document: &str,
        compute_ids: &[String],
        timeout: Duration,
    ) -> anyhow::Result<String>;

    async fn get_invocation(
        &self,
        command_id: &str,
        compute_id: &str,
    ) -> anyhow::Result<CommandInvocation>;

    /// Waits until the invocation on one host reaches a terminal state,
    /// failing on anything other than success.
    async fn wait_executed(
        &self,
        command_id: &str,
        compute_id: &str,
        wait: WaitParams,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Compute-platform health, keyed by the underlying VM identifier.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Waits until the instance reports an OK status. Polling bounds are the
    /// platform client's defaults.
    async fn wait_status_ok(
        &self,
        compute_id: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}
