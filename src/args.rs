use clap::Parser;

/// Bottlerocket cluster updater
///
/// Watches Bottlerocket container hosts in your cluster and updates them when
/// they have updates available.
///
/// Arguments can be specified by environment variable. Command-line arguments
/// will override a value that is given by environment variable.
#[derive(Debug, Parser)]
pub struct Args {
    /// How much detail to log; from least to most: error, warn, info, debug, trace
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
    /// The short name or fully-qualified identifier of the cluster in which we
    /// will manage Bottlerocket hosts
    #[arg(long, env = "BOTTLEROCKET_CLUSTER")]
    pub cluster: String,
    /// The region in which the cluster is running
    #[arg(long, env = "BOTTLEROCKET_REGION")]
    pub region: String,
    /// The document name for checking available updates
    #[arg(long, env = "BOTTLEROCKET_CHECK_DOCUMENT")]
    pub check_document: String,
    /// The document name for applying updates
    #[arg(long, env = "BOTTLEROCKET_APPLY_DOCUMENT")]
    pub apply_document: String,
    /// The document name to initiate a reboot
    #[arg(long, env = "BOTTLEROCKET_REBOOT_DOCUMENT")]
    pub reboot_document: String,
    /// Base address of the cluster control-plane API
    #[arg(long, env = "UPDATER_API_ADDRESS")]
    pub api_address: String,
    /// Token used to authenticate against the control-plane API
    #[arg(long, env = "UPDATER_API_TOKEN", hide_env_values = true)]
    pub api_token: String,
}
