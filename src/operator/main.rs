use std::sync::Arc;

use dotenvy::dotenv;
use etok::{
    config::{operator_command, OperatorConfig},
    controllers::{
        run::run_controller, workspace::workspace_controller, RunReconciler, WorkspaceReconciler,
    },
    telemetry,
};
use etok_kube_store::kube_cluster;

const SERVICE_NAME: &str = "etok-operator";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = OperatorConfig::from_matches(&operator_command().get_matches())?;

    telemetry::init(SERVICE_NAME, config.jaeger)?;

    tracing::info!(image = %config.image, "operator: starting");

    let client = kube::Client::try_default().await?;
    let cluster = kube_cluster(client.clone());

    let workspaces = Arc::new(WorkspaceReconciler::new(cluster.clone(), &config.image));
    let runs = Arc::new(RunReconciler::new(cluster, &config.image));

    tokio::join!(
        workspace_controller(client.clone(), workspaces),
        run_controller(client, runs)
    );

    tracing::info!("operator: stopped");

    telemetry::shutdown(config.jaeger);

    Ok(())
}
