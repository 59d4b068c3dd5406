use crate::api::CommandApi;
use crate::command::{CommandDriver, SEND_WINDOW};
use crate::paginate::each_window;
use crate::updater::{Candidate, Host};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// The host's own view of whether a new OS image is available. Values outside
/// the known set are carried verbatim so callers can reject them explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UpdateState {
    Idle,
    Available,
    Staged,
    Ready,
    Other(String),
}

impl From<String> for UpdateState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Idle" => UpdateState::Idle,
            "Available" => UpdateState::Available,
            "Staged" => UpdateState::Staged,
            "Ready" => UpdateState::Ready,
            _ => UpdateState::Other(value),
        }
    }
}

impl From<UpdateState> for String {
    fn from(state: UpdateState) -> Self {
        match state {
            UpdateState::Idle => "Idle".to_string(),
            UpdateState::Available => "Available".to_string(),
            UpdateState::Staged => "Staged".to_string(),
            UpdateState::Ready => "Ready".to_string(),
            UpdateState::Other(value) => value,
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::Idle => f.write_str("Idle"),
            UpdateState::Available => f.write_str("Available"),
            UpdateState::Staged => f.write_str("Staged"),
            UpdateState::Ready => f.write_str("Ready"),
            UpdateState::Other(value) => f.write_str(value),
        }
    }
}

/// Parsed output of the check document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutput {
    pub update_state: UpdateState,
    pub active_partition: ActivePartition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePartition {
    pub image: PartitionImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionImage {
    pub version: String,
}

impl CheckOutput {
    pub fn active_version(&self) -> &str {
        &self.active_partition.image.version
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckParseError {
    #[error("failed to deserialize check output")]
    Json(#[from] serde_json::Error),
    #[error("mandatory fields are not available")]
    MissingFields,
}

// Mandatory fields arrive optional on the wire; presence is validated here so
// an empty `{}` reports missing fields rather than a serde type error.
#[derive(Deserialize)]
struct RawCheckOutput {
    #[serde(default)]
    update_state: Option<String>,
    #[serde(default)]
    active_partition: Option<RawActivePartition>,
}

#[derive(Deserialize)]
struct RawActivePartition {
    #[serde(default)]
    image: Option<RawPartitionImage>,
}

#[derive(Deserialize)]
struct RawPartitionImage {
    #[serde(default)]
    version: Option<String>,
}

/// Parses check-document stdout. Both `update_state` and
/// `active_partition.image.version` must be present and non-empty.
pub fn parse_check_output(bytes: &[u8]) -> Result<CheckOutput, CheckParseError> {
    let raw: RawCheckOutput = serde_json::from_slice(bytes)?;

    let update_state = raw
        .update_state
        .filter(|state| !state.is_empty())
        .ok_or(CheckParseError::MissingFields)?;
    let version = raw
        .active_partition
        .and_then(|partition| partition.image)
        .and_then(|image| image.version)
        .filter(|version| !version.is_empty())
        .ok_or(CheckParseError::MissingFields)?;

    Ok(CheckOutput {
        update_state: update_state.into(),
        active_partition: ActivePartition {
            image: PartitionImage { version },
        },
    })
}

/// Runs the check document over `hosts` in command-service windows and keeps
/// the hosts reporting an update in `Available` or `Ready` state, stashing
/// the currently active version for post-update verification.
///
/// Per-host fetch and parse failures skip the host; those hosts get checked
/// again on the next scheduled run. Window send failures are tolerated unless
/// every window failed.
pub async fn filter_updates_available<M: CommandApi>(
    driver: &CommandDriver<'_, M>,
    hosts: &[Host],
    check_document: &str,
) -> anyhow::Result<Vec<Candidate>> {
    let collected = Mutex::new(Vec::new());
    let failures = Mutex::new((0usize, None));

    let (windows, _) = each_window(hosts.len(), SEND_WINDOW, |start, stop| {
        let window = &hosts[start..stop];
        let collected = &collected;
        let failures = &failures;
        async move {
            match check_window(driver, window, check_document).await {
                Ok(mut candidates) => collected.lock().unwrap().append(&mut candidates),
                Err(e) => {
                    warn!(
                        window_start = start,
                        window_stop = stop,
                        error = format!("{e:#}").as_str(),
                        "update check failed for window"
                    );
                    let mut failures = failures.lock().unwrap();
                    failures.0 += 1;
                    failures.1 = Some(e);
                }
            }
            Ok::<(), std::convert::Infallible>(())
        }
    })
    .await;

    let (failed_windows, last_error) = failures.into_inner().unwrap();
    if windows > 0 && failed_windows == windows {
        return Err(last_error.unwrap());
    }
    Ok(collected.into_inner().unwrap())
}

async fn check_window<M: CommandApi>(
    driver: &CommandDriver<'_, M>,
    window: &[Host],
    check_document: &str,
) -> anyhow::Result<Vec<Candidate>> {
    let compute_ids: Vec<String> = window
        .iter()
        .map(|host| host.compute_id.clone())
        .collect();
    let command_id = driver.send(&compute_ids, check_document).await?;

    let mut candidates = Vec::new();
    for host in window {
        let bytes = match driver.result(&command_id, &host.compute_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    compute_id = host.compute_id.as_str(),
                    error = format!("{e:#}").as_str(),
                    "could not collect check output; host will be checked on the next run"
                );
                continue;
            }
        };
        let output = match parse_check_output(&bytes) {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    compute_id = host.compute_id.as_str(),
                    raw = String::from_utf8_lossy(&bytes).as_ref(),
                    error = format!("{e:#}").as_str(),
                    "could not parse check output; host will be checked on the next run"
                );
                continue;
            }
        };
        match output.update_state {
            UpdateState::Available | UpdateState::Ready => {
                info!(
                    compute_id = host.compute_id.as_str(),
                    state = %output.update_state,
                    version = output.active_version(),
                    "update available"
                );
                candidates.push(Candidate {
                    host: host.clone(),
                    pre_update_version: output.active_version().to_string(),
                });
            }
            state => debug!(
                compute_id = host.compute_id.as_str(),
                state = %state,
                "no update pending"
            ),
        }
    }
    Ok(candidates)
}
