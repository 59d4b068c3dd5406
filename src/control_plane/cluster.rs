use crate::api::{
    ClusterApi, HostDescription, HostState, StateChangeOutcome, TaskDescription, TaskFilter,
    WaitParams,
};
use crate::control_plane::request::{get_list, post};
use crate::control_plane::{Client, PaginationMeta, PaginationParams};
use anyhow::bail;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The control plane serves at most 100 hosts per listing page.
const HOSTS_PAGE_SIZE: u64 = 100;
const STOPPED_STATUS: &str = "STOPPED";

#[derive(Serialize)]
struct DescribeHostsRequest<'a> {
    host_ids: &'a [String],
}

#[derive(Serialize)]
struct HostStateRequest<'a> {
    host_ids: &'a [String],
    state: &'a str,
}

#[derive(Serialize)]
struct DescribeTasksRequest<'a> {
    task_arns: &'a [String],
}

#[async_trait]
impl ClusterApi for Client {
    async fn list_hosts(&self, cluster: &str) -> anyhow::Result<Vec<String>> {
        let path = format!("/v1/clusters/{cluster}/hosts");
        let mut params = HashMap::new();
        params.insert(String::from("status"), String::from("ACTIVE"));

        let mut all_hosts: Option<Vec<String>> = None;
        let mut pagination_params = PaginationParams {
            page: 1,
            per_page: HOSTS_PAGE_SIZE,
        };

        loop {
            let (mut hosts, pagination_meta): (Vec<String>, Option<PaginationMeta>) = get_list(
                &self.http_client,
                &self.config,
                &path,
                "/hosts",
                params.clone(),
                Some(&pagination_params),
            )
            .await?;

            if all_hosts.is_none() {
                all_hosts = Some(allocate_result_vec(pagination_meta));
            }

            let result_is_empty = hosts.is_empty();
            all_hosts.as_mut().unwrap().append(&mut hosts);

            if result_is_empty {
                break;
            } else {
                pagination_params.page += 1;
            }
        }

        Ok(all_hosts.unwrap_or_default())
    }

    async fn describe_hosts(
        &self,
        cluster: &str,
        member_ids: &[String],
    ) -> anyhow::Result<Vec<HostDescription>> {
        let path = format!("/v1/clusters/{cluster}/hosts/describe");
        let described = post(
            &self.http_client,
            &self.config,
            &path,
            &DescribeHostsRequest {
                host_ids: member_ids,
            },
            Some("/hosts"),
            HashMap::new(),
        )
        .await?;
        Ok(described)
    }

    async fn set_host_state(
        &self,
        cluster: &str,
        member_ids: &[String],
        state: HostState,
    ) -> anyhow::Result<StateChangeOutcome> {
        let path = format!("/v1/clusters/{cluster}/hosts/state");
        let outcome = post(
            &self.http_client,
            &self.config,
            &path,
            &HostStateRequest {
                host_ids: member_ids,
                state: state.as_str(),
            },
            None,
            HashMap::new(),
        )
        .await?;
        Ok(outcome)
    }

    async fn list_tasks(&self, cluster: &str, filter: &TaskFilter) -> anyhow::Result<Vec<String>> {
        let path = format!("/v1/clusters/{cluster}/tasks");
        let mut params = HashMap::new();
        match filter {
            TaskFilter::Host(member_id) => params.insert(String::from("host"), member_id.clone()),
            TaskFilter::Family(family) => params.insert(String::from("family"), family.clone()),
        };

        let (tasks, _) = get_list(
            &self.http_client,
            &self.config,
            &path,
            "/tasks",
            params,
            None,
        )
        .await?;
        Ok(tasks)
    }

    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> anyhow::Result<Vec<TaskDescription>> {
        let path = format!("/v1/clusters/{cluster}/tasks/describe");
        let described = post(
            &self.http_client,
            &self.config,
            &path,
            &DescribeTasksRequest { task_arns },
            Some("/tasks"),
            HashMap::new(),
        )
        .await?;
        Ok(described)
    }

    async fn wait_tasks_stopped(
        &self,
        cluster: &str,
        task_arns: &[String],
        wait: WaitParams,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        for attempt in 1..=wait.attempts {
            let tasks = self.describe_tasks(cluster, task_arns).await?;
            let all_stopped = tasks
                .iter()
                .all(|task| task.last_status.as_deref() == Some(STOPPED_STATUS));
            if all_stopped {
                return Ok(());
            }
            debug!(attempt, tasks = task_arns.len(), "tasks still running");

            tokio::select! {
                _ = tokio::time::sleep(wait.delay) => {}
                _ = cancel.cancelled() => bail!("cancelled while waiting for tasks to stop"),
            }
        }
        bail!(
            "tasks did not stop within {} attempts",
            wait.attempts
        )
    }
}

fn allocate_result_vec<T>(pagination_meta: Option<PaginationMeta>) -> Vec<T> {
    pagination_meta
        .and_then(|meta| meta.total_entries)
        .map(|total| Vec::with_capacity(total as usize))
        .unwrap_or_default()
}
