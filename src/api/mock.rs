//! Scripted in-memory implementations of the capability traits.
//!
//! Tests seed each fake with a queue of responses and inspect the calls it
//! recorded afterwards. A queue pops entries until one remains; the last entry
//! then repeats, so a single scripted response answers any number of calls.

use super::{
    ApiFailure, ClusterApi, CommandApi, CommandInvocation, ComputeApi, HostAttribute,
    HostDescription, HostState, StateChangeOutcome, TaskDescription, TaskFilter, WaitParams,
};
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct Script<T>(Mutex<VecDeque<Result<T, String>>>);

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self(Mutex::new(VecDeque::new()))
    }
}

impl<T: Clone> Script<T> {
    pub fn push_ok(&self, value: T) {
        self.0.lock().unwrap().push_back(Ok(value));
    }

    pub fn push_err(&self, message: impl Into<String>) {
        self.0.lock().unwrap().push_back(Err(message.into()));
    }

    fn next(&self, what: &str) -> anyhow::Result<T> {
        let mut queue = self.0.lock().unwrap();
        let entry = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match entry {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(anyhow!("{message}")),
            None => Err(anyhow!("no scripted response for {what}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterCall {
    ListHosts,
    DescribeHosts(Vec<String>),
    SetState {
        member_ids: Vec<String>,
        state: HostState,
    },
    ListTasks(TaskFilter),
    DescribeTasks(Vec<String>),
    WaitTasksStopped(Vec<String>),
}

#[derive(Clone, Default)]
pub struct FakeClusterApi {
    pub hosts: Arc<Script<Vec<String>>>,
    pub descriptions: Arc<Script<Vec<HostDescription>>>,
    pub state_changes: Arc<Script<StateChangeOutcome>>,
    pub task_lists: Arc<Script<Vec<String>>>,
    pub task_descriptions: Arc<Script<Vec<TaskDescription>>>,
    pub stop_waits: Arc<Script<()>>,
    pub calls: Arc<Mutex<Vec<ClusterCall>>>,
}

impl FakeClusterApi {
    fn record(&self, call: ClusterCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// The sequence of registration states requested over the run.
    pub fn state_transitions(&self) -> Vec<HostState> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                ClusterCall::SetState { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn list_hosts(&self, _cluster: &str) -> anyhow::Result<Vec<String>> {
        self.record(ClusterCall::ListHosts);
        self.hosts.next("list_hosts")
    }

    async fn describe_hosts(
        &self,
        _cluster: &str,
        member_ids: &[String],
    ) -> anyhow::Result<Vec<HostDescription>> {
        self.record(ClusterCall::DescribeHosts(member_ids.to_vec()));
        self.descriptions.next("describe_hosts")
    }

    async fn set_host_state(
        &self,
        _cluster: &str,
        member_ids: &[String],
        state: HostState,
    ) -> anyhow::Result<StateChangeOutcome> {
        self.record(ClusterCall::SetState {
            member_ids: member_ids.to_vec(),
            state,
        });
        self.state_changes.next("set_host_state")
    }

    async fn list_tasks(&self, _cluster: &str, filter: &TaskFilter) -> anyhow::Result<Vec<String>> {
        self.record(ClusterCall::ListTasks(filter.clone()));
        self.task_lists.next("list_tasks")
    }

    async fn describe_tasks(
        &self,
        _cluster: &str,
        task_arns: &[String],
    ) -> anyhow::Result<Vec<TaskDescription>> {
        self.record(ClusterCall::DescribeTasks(task_arns.to_vec()));
        self.task_descriptions.next("describe_tasks")
    }

    async fn wait_tasks_stopped(
        &self,
        _cluster: &str,
        task_arns: &[String],
        _wait: WaitParams,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.record(ClusterCall::WaitTasksStopped(task_arns.to_vec()));
        self.stop_waits.next("wait_tasks_stopped")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub document: String,
    pub compute_ids: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeCommandApi {
    /// Responses for `send`; when unscripted, sends succeed with a generated
    /// command id.
    pub send_results: Arc<Script<String>>,
    /// Compute ids whose execution waiter should fail, with the message.
    pub wait_failures: Arc<Mutex<HashMap<String, String>>>,
    /// Per-host invocation responses, consumed with repeat-last semantics.
    pub invocations: Arc<Mutex<HashMap<String, VecDeque<Result<CommandInvocation, String>>>>>,
    pub sent: Arc<Mutex<Vec<SentCommand>>>,
}

impl FakeCommandApi {
    pub fn script_invocation(&self, compute_id: &str, status: &str, stdout: &str) {
        self.invocations
            .lock()
            .unwrap()
            .entry(compute_id.to_string())
            .or_default()
            .push_back(Ok(CommandInvocation {
                status: status.to_string(),
                stdout: stdout.to_string(),
            }));
    }

    pub fn script_invocation_err(&self, compute_id: &str, message: &str) {
        self.invocations
            .lock()
            .unwrap()
            .entry(compute_id.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub fn fail_wait(&self, compute_id: &str, message: &str) {
        self.wait_failures
            .lock()
            .unwrap()
            .insert(compute_id.to_string(), message.to_string());
    }

    /// Documents sent so far, in order.
    pub fn sent_documents(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|command| command.document.clone())
            .collect()
    }
}

#[async_trait]
impl CommandApi for FakeCommandApi {
    async fn send(
        &self,
        document: &str,
        compute_ids: &[String],
        _timeout: Duration,
    ) -> anyhow::Result<String> {
        let generated = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(SentCommand {
                document: document.to_string(),
                compute_ids: compute_ids.to_vec(),
            });
            format!("command-{}", sent.len())
        };
        match self.send_results.next("send") {
            Err(_) if self.send_results.0.lock().unwrap().is_empty() => Ok(generated),
            scripted => scripted,
        }
    }

    async fn get_invocation(
        &self,
        _command_id: &str,
        compute_id: &str,
    ) -> anyhow::Result<CommandInvocation> {
        let mut invocations = self.invocations.lock().unwrap();
        let queue = invocations
            .get_mut(compute_id)
            .ok_or_else(|| anyhow!("no scripted invocation for {compute_id}"))?;
        let entry = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match entry {
            Some(Ok(invocation)) => Ok(invocation),
            Some(Err(message)) => Err(anyhow!("{message}")),
            None => Err(anyhow!("no scripted invocation for {compute_id}")),
        }
    }

    async fn wait_executed(
        &self,
        _command_id: &str,
        compute_id: &str,
        _wait: WaitParams,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        match self.wait_failures.lock().unwrap().get(compute_id) {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeComputeApi {
    pub failures: Arc<Mutex<HashMap<String, String>>>,
    pub waited: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ComputeApi for FakeComputeApi {
    async fn wait_status_ok(
        &self,
        compute_id: &str,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.waited.lock().unwrap().push(compute_id.to_string());
        match self.failures.lock().unwrap().get(compute_id) {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

/// Host description with a single attribute, as most fixtures need.
pub fn host_description(member_id: &str, compute_id: &str, attribute: &str) -> HostDescription {
    HostDescription {
        member_id: member_id.to_string(),
        compute_id: compute_id.to_string(),
        attributes: vec![HostAttribute {
            name: attribute.to_string(),
            value: None,
        }],
        registered_at: None,
    }
}

/// State-change outcome refusing every given host with one reason.
pub fn refused(ids: &[&str], reason: &str) -> StateChangeOutcome {
    StateChangeOutcome {
        failures: ids
            .iter()
            .map(|id| ApiFailure {
                id: (*id).to_string(),
                reason: reason.to_string(),
            })
            .collect(),
    }
}
