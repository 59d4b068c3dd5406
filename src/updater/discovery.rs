use crate::api::ClusterApi;
use crate::paginate::each_window;
use crate::updater::Host;
use anyhow::Context;
use std::sync::Mutex;
use tracing::{info, warn};

/// Attribute advertised by hosts running the target OS; only the name
/// matters, the variant value is irrelevant.
pub const TARGET_OS_ATTRIBUTE: &str = "bottlerocket.variant";

/// The control plane caps host descriptions at 100 per call.
pub const DESCRIBE_WINDOW: usize = 100;

/// Lists the cluster member ids of every host in ACTIVE registration status.
pub async fn list_active_hosts<C: ClusterApi>(
    api: &C,
    cluster: &str,
) -> anyhow::Result<Vec<String>> {
    api.list_hosts(cluster)
        .await
        .context("cannot list container hosts")
}

/// Describes the given hosts in windows and keeps those advertising the
/// Bottlerocket variant attribute. Window failures are tolerated unless every
/// window failed; the run then works with whatever was collected.
pub async fn filter_target_os<C: ClusterApi>(
    api: &C,
    cluster: &str,
    member_ids: &[String],
) -> anyhow::Result<Vec<Host>> {
    let collected = Mutex::new(Vec::new());
    let failures = Mutex::new((0usize, None));

    let (windows, _) = each_window(member_ids.len(), DESCRIBE_WINDOW, |start, stop| {
        let window = &member_ids[start..stop];
        let collected = &collected;
        let failures = &failures;
        async move {
            match api.describe_hosts(cluster, window).await {
                Ok(descriptions) => {
                    let mut collected = collected.lock().unwrap();
                    for description in descriptions {
                        let runs_target_os = description
                            .attributes
                            .iter()
                            .any(|attribute| attribute.name == TARGET_OS_ATTRIBUTE);
                        if runs_target_os {
                            info!(
                                compute_id = description.compute_id.as_str(),
                                "Bottlerocket host detected; queued for update check"
                            );
                            collected.push(Host {
                                compute_id: description.compute_id,
                                member_id: description.member_id,
                            });
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        window_start = start,
                        window_stop = stop,
                        error = format!("{e:#}").as_str(),
                        "cannot describe container hosts in window"
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
        return Err(last_error.unwrap().context("cannot describe container hosts"));
    }
    Ok(collected.into_inner().unwrap())
}
