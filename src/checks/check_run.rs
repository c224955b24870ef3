use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use kube::{
    runtime::{watcher, Controller},
    Api, Client, ResourceExt,
};

use etok_core::{
    conditions::{self, CHECK_RUN_REQUESTED_REASON, CREATE_REQUESTED_CONDITION},
    CheckRun, CheckSuite, Cluster, PodLogs, Run, RunPhase, Workspace,
};

use super::{
    async_client::Invokable,
    client::GithubApi,
    installs::TaskSender,
    monitor::{monitor, Process, DEFAULT_MONITOR_INTERVAL},
    repo_manager::RepoManager,
    run_resources::run_resources,
    update::CheckRunUpdate,
};
use crate::reconcile::{self, Reconciler, Requeue};

/// Streams a running run's logs into an update, which is periodically sent
/// to GitHub by the monitor.
struct LogFollower {
    update: CheckRunUpdate,
    logs: Arc<dyn PodLogs>,
    namespace: String,
    pod: String,
}

#[async_trait]
impl Invokable for LogFollower {
    async fn invoke(&self, api: &dyn GithubApi) -> anyhow::Result<()> {
        self.update.invoke(api).await
    }
}

#[async_trait]
impl Process for LogFollower {
    async fn start(&self) -> anyhow::Result<()> {
        let sink = self.update.logs();
        self.logs.follow(&self.namespace, &self.pod, &sink).await
    }
}

/// What the reconcile learnt about the current iteration's run.
enum Progress {
    Missing(Option<anyhow::Error>),
    Following,
    Logs(Vec<u8>),
    Failed(anyhow::Error),
    Waiting,
}

/// Drives a check run's current iteration: creates its run, follows the
/// run's progress and reports it to GitHub.
pub struct CheckRunReconciler {
    cluster: Cluster,
    repos: Arc<RepoManager>,
    sender: Arc<dyn TaskSender>,
    monitor_interval: Duration,
    strip_refreshing: bool,
}

impl CheckRunReconciler {
    pub fn new(cluster: Cluster, repos: Arc<RepoManager>, sender: Arc<dyn TaskSender>) -> Self {
        Self {
            cluster,
            repos,
            sender,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            strip_refreshing: false,
        }
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_strip_refreshing(mut self, strip_refreshing: bool) -> Self {
        self.strip_refreshing = strip_refreshing;
        self
    }

    async fn create_run(
        &self,
        check_run: &CheckRun,
        suite: &CheckSuite,
        workspace: &Workspace,
    ) -> anyhow::Result<()> {
        let repo_path = self.repos.clone_repo(&suite.spec).await?;
        let (run, config_map) = run_resources(check_run, suite, workspace, &repo_path)?;
        let namespace = run.namespace().unwrap_or_default();

        // the archive goes first so the run's pod can mount it straightaway
        if self
            .cluster
            .config_maps
            .get(&namespace, &config_map.name_any())
            .await?
            .is_none()
        {
            self.cluster.config_maps.create(&config_map).await?;
        }
        self.cluster.runs.create(&run).await?;

        tracing::info!(namespace = %namespace, run = %run.name_any(), "created run");

        Ok(())
    }

    async fn progress(
        &self,
        check_run: &CheckRun,
        suite: &CheckSuite,
        workspace: &Workspace,
        run: Option<&Run>,
    ) -> Progress {
        let run = match run {
            Some(run) => run,
            None => {
                let created = self.create_run(check_run, suite, workspace).await;
                return Progress::Missing(created.err());
            }
        };

        if run.phase() == RunPhase::Running {
            return Progress::Following;
        }

        if !run.is_streamable() {
            return Progress::Waiting;
        }

        let namespace = run.namespace().unwrap_or_default();
        match self.cluster.logs.logs(&namespace, &run.name_any()).await {
            Ok(logs) => Progress::Logs(logs),
            Err(err) => Progress::Failed(err),
        }
    }
}

#[async_trait]
impl Reconciler for CheckRunReconciler {
    #[tracing::instrument(name = "check_run::reconcile", skip(self))]
    async fn reconcile(&self, namespace: &str, name: &str) -> anyhow::Result<Requeue> {
        let mut check_run = match self.cluster.check_runs.get(namespace, name).await? {
            Some(check_run) => check_run,
            None => return Ok(Requeue::Never),
        };

        if check_run.iteration_completed() {
            return Ok(Requeue::Never);
        }

        let suite = match self
            .cluster
            .check_suites
            .get("", &check_run.spec.check_suite_ref)
            .await?
        {
            Some(suite) => suite,
            None => {
                return Err(anyhow::anyhow!(
                    "check suite {} not found",
                    check_run.spec.check_suite_ref
                ))
            }
        };

        let workspace = match self
            .cluster
            .workspaces
            .get(namespace, &check_run.spec.workspace)
            .await?
        {
            Some(workspace) => workspace,
            None => {
                return Err(anyhow::anyhow!(
                    "workspace {}/{} not found",
                    namespace,
                    check_run.spec.workspace
                ))
            }
        };

        let run = self
            .cluster
            .runs
            .get(namespace, &check_run.run_name())
            .await?;

        let progress = self
            .progress(&check_run, &suite, &workspace, run.as_ref())
            .await;

        let mut update = CheckRunUpdate::new(check_run.clone(), suite.spec.clone(), run)
            .with_strip_refreshing(self.strip_refreshing);
        let mut reconcile_error = None;
        let mut following = false;
        match progress {
            Progress::Missing(Some(err)) | Progress::Failed(err) => {
                update = update.with_reconcile_error(&err);
                reconcile_error = Some(err);
            }
            Progress::Logs(logs) => update = update.with_logs(logs),
            Progress::Following => following = true,
            Progress::Missing(None) | Progress::Waiting => {}
        }

        let previous = check_run.status.clone();

        // only one create request may be outstanding until GitHub confirms it
        let send = if check_run.is_created() {
            true
        } else if !check_run.is_create_requested() {
            conditions::set(
                &mut check_run.status_mut().conditions,
                CREATE_REQUESTED_CONDITION,
                true,
                CHECK_RUN_REQUESTED_REASON,
                "",
            );
            true
        } else {
            false
        };

        let status = check_run.status_mut();
        status.status = Some(update.status().to_string());
        status.conclusion = update.conclusion().map(str::to_string);
        if send && update.is_completed() {
            check_run.set_iteration_completed(true);
        }
        if check_run.status != previous {
            self.cluster.check_runs.replace_status(&check_run).await?;
        }

        if send {
            let install_id = update.install_id();

            if following && check_run.is_created() {
                let follower = Arc::new(LogFollower {
                    update,
                    logs: Arc::clone(&self.cluster.logs),
                    namespace: namespace.to_string(),
                    pod: check_run.run_name(),
                });

                if let Err(err) = monitor(
                    self.sender.as_ref(),
                    install_id,
                    follower,
                    self.monitor_interval,
                )
                .await
                {
                    tracing::warn!(check_run = %name, "streaming logs failed: {}", err);
                }
            } else {
                self.sender.send(install_id, Arc::new(update)).await?;
            }
        }

        match reconcile_error {
            Some(err) => Err(err),
            None => Ok(Requeue::Never),
        }
    }
}

/// Reconciles check runs when they change and when their runs change.
pub async fn check_run_controller(client: Client, reconciler: Arc<CheckRunReconciler>) {
    let check_runs = Api::<CheckRun>::all(client.clone());
    let runs = Api::<Run>::all(client);

    let controller = Controller::new(check_runs, watcher::Config::default())
        .owns(runs, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            reconcile::reconcile::<CheckRun, CheckRunReconciler>,
            reconcile::error_policy::<CheckRun, CheckRunReconciler>,
            reconciler,
        );

    reconcile::drain("check_run", controller).await;
}
