//! Tofan Operator - executes TestCases against ObjectTemplates

use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;

use tofan_common::telemetry::init_logging;
use tofan_operator::cli::Cli;
use tofan_operator::controller_runner::{build_template_controllers, build_test_case_controllers};
use tofan_operator::startup::{crd_manifests, ensure_crds};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    init_logging(cli.log_config())?;
    let config = cli.engine_config();

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if cli.install_crds {
        ensure_crds(&client, &config.field_manager).await?;
    }

    let shutdown = CancellationToken::new();

    tracing::info!("Starting Tofan controllers:");
    let mut controllers = build_template_controllers(client.clone(), config.clone());
    controllers.extend(build_test_case_controllers(
        client,
        config,
        shutdown.clone(),
    ));

    futures::future::join_all(controllers).await;

    shutdown.cancel();
    tracing::info!("Tofan controllers stopped");
    Ok(())
}
