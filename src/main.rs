use bottlerocket_cluster_updater::args::Args;
use bottlerocket_cluster_updater::control_plane;
use bottlerocket_cluster_updater::updater::{guard, Documents, Updater, UpdaterConfig};
use clap::Parser;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // clap renders its own usage message; the exit code is ours
            let _ = e.print();
            process::exit(1);
        }
    };
    init_logging(&args.log_level);

    // the error message is printed via its display impl, with full context
    if let Err(e) = run(args).await {
        eprintln!("{e:#}");
        process::exit(1);
    }
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let client = control_plane::Client::builder()
        .address(args.api_address)
        .api_token(args.api_token)
        .region(args.region)
        .build()?;

    let cancel = CancellationToken::new();
    tokio::spawn(watch_for_shutdown(cancel.clone()));

    let config = UpdaterConfig {
        task_definition_arn: std::env::var(guard::TASK_DEFINITION_ARN_ENV).ok(),
        ..UpdaterConfig::default()
    };

    // one client serves all three capabilities; the updater gets its own handles
    let updater = Updater::new(
        args.cluster,
        Documents {
            check: args.check_document,
            apply: args.apply_document,
            reboot: args.reboot_document,
        },
        client.clone(),
        client.clone(),
        client,
        config,
        cancel,
    );
    updater.run().await?;
    Ok(())
}

async fn watch_for_shutdown(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("interrupt received, aborting in-flight waits");
            cancel.cancel();
        }
        Err(e) => info!(
            error = format!("{e}").as_str(),
            "could not install interrupt handler"
        ),
    }
}
