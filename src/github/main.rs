use std::sync::Arc;

use dotenvy::dotenv;
use etok::{
    checks::{
        check_run_controller, check_suite_controller, serve, CheckRunReconciler,
        CheckSuiteReconciler, EventHandler, Git2Cloner, InstallsManager, RepoManager,
        WebhookState,
    },
    config::{github_command, GithubConfig},
    telemetry,
};
use etok_kube_store::kube_cluster;
use tokio_util::sync::CancellationToken;

const SERVICE_NAME: &str = "etok-github";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = GithubConfig::from_matches(&github_command().get_matches())?;

    telemetry::init(SERVICE_NAME, config.jaeger)?;

    tracing::info!(app_id = config.app_id, "github: starting");

    let cancel = CancellationToken::new();

    let installs = Arc::new(InstallsManager::new(
        config.app_id,
        &config.key_path,
        cancel.clone(),
    )?);

    tokio::fs::create_dir_all(&config.clone_dir).await?;
    let repos = Arc::new(
        RepoManager::new(&config.clone_dir, installs.clone(), Arc::new(Git2Cloner))
            .with_ttl(config.repo_ttl),
    );

    let client = kube::Client::try_default().await?;
    let cluster = kube_cluster(client.clone());

    let check_suites = Arc::new(CheckSuiteReconciler::new(cluster.clone(), repos.clone()));
    let check_runs = Arc::new(
        CheckRunReconciler::new(cluster.clone(), repos.clone(), installs.clone())
            .with_monitor_interval(config.monitor_interval)
            .with_strip_refreshing(config.strip_refreshing),
    );

    let state = Arc::new(WebhookState::new(
        &config.webhook_secret,
        EventHandler::new(cluster),
    )?);

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("unable to listen for shutdown signal: {}", err);
        }
        shutdown.cancel();
    });

    let (served, _, _, _) = tokio::join!(
        serve(config.addr(), state, cancel.clone()),
        repos.reaper(cancel.clone(), config.reaper_interval),
        check_suite_controller(client.clone(), check_suites),
        check_run_controller(client, check_runs)
    );

    tracing::info!("github: stopped");

    telemetry::shutdown(config.jaeger);

    served
}
