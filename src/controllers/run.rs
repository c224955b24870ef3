use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    runtime::{reflector::ObjectRef, watcher, Controller},
    Api, Client, ResourceExt,
};

use etok_core::{
    conditions::{
        self, COMPLETE_CONDITION, ENQUEUE_TIMEOUT_REASON, FAILED_CONDITION, POD_CREATED_REASON,
        POD_FAILED_REASON, POD_PENDING_REASON, POD_PENDING_TIMEOUT_REASON, POD_RUNNING_REASON,
        POD_SUCCEEDED_REASON, POD_UNKNOWN_REASON, QUEUED_REASON, QUEUE_TIMEOUT_REASON,
        UNQUEUED_REASON, WORKSPACE_NOT_FOUND_REASON,
    },
    Cluster, Run, Workspace,
};

use super::{ensure_owner, pods, remaining};
use crate::reconcile::{self, Reconciler, Requeue};

pub const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(10);
pub const QUEUE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const POD_PENDING_TIMEOUT: Duration = Duration::from_secs(60);

/// Whether the next updater in the chain gets to see the run.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue(Requeue),
    Bail(Requeue),
}

/// One step of a run reconcile, updating the run's status in place.
#[async_trait]
pub trait RunUpdater: Send + Sync {
    async fn update(&self, run: &mut Run, workspace: &Workspace) -> anyhow::Result<Flow>;
}

fn fail(run: &mut Run, reason: &str, message: &str) {
    tracing::warn!(run = %run.name_any(), reason, "{}", message);

    conditions::set(
        &mut run.status_mut().conditions,
        FAILED_CONDITION,
        true,
        reason,
        message,
    );
}

fn incomplete(run: &mut Run, reason: &str, message: &str) {
    conditions::set(
        &mut run.status_mut().conditions,
        COMPLETE_CONDITION,
        false,
        reason,
        message,
    );
}

/// Holds back queueable runs until the workspace makes them active, failing
/// them if they wait too long.
pub struct QueueGate {
    pub enqueue_timeout: Duration,
    pub queue_timeout: Duration,
}

impl Default for QueueGate {
    fn default() -> Self {
        Self {
            enqueue_timeout: ENQUEUE_TIMEOUT,
            queue_timeout: QUEUE_TIMEOUT,
        }
    }
}

#[async_trait]
impl RunUpdater for QueueGate {
    async fn update(&self, run: &mut Run, workspace: &Workspace) -> anyhow::Result<Flow> {
        let name = run.name_any();

        if !run.spec.command.is_queueable() || workspace.active() == Some(name.as_str()) {
            return Ok(Flow::Continue(Requeue::Never));
        }

        let queued = workspace
            .status
            .as_ref()
            .map(|status| status.queue.contains(&name))
            .unwrap_or(false);

        let (reason, message, timeout) = if queued {
            (QUEUED_REASON, "Run waiting in workspace queue", self.queue_timeout)
        } else {
            (
                UNQUEUED_REASON,
                "Run is waiting to be made active or to be added to workspace queue",
                self.enqueue_timeout,
            )
        };
        incomplete(run, reason, message);

        let since = match conditions::find(run.conditions(), COMPLETE_CONDITION) {
            Some(complete) => complete.last_transition_time.clone(),
            None => return Err(anyhow::anyhow!("run {} has no complete condition", name)),
        };

        match remaining(&since, timeout) {
            Some(left) => Ok(Flow::Bail(Requeue::After(left))),
            None if queued => {
                fail(run, QUEUE_TIMEOUT_REASON, "Timed out waiting in the queue");
                Ok(Flow::Bail(Requeue::Never))
            }
            None => {
                fail(run, ENQUEUE_TIMEOUT_REASON, "Timed out waiting to be enqueued");
                Ok(Flow::Bail(Requeue::Never))
            }
        }
    }
}

/// Creates the run's pod and mirrors the pod's phase onto the run.
pub struct PodManager {
    cluster: Cluster,
    image: String,
    pub pending_timeout: Duration,
}

impl PodManager {
    pub fn new(cluster: Cluster, image: &str) -> Self {
        Self {
            cluster,
            image: image.to_string(),
            pending_timeout: POD_PENDING_TIMEOUT,
        }
    }
}

fn reason_from_pod_phase(phase: &str) -> &'static str {
    match phase {
        "Succeeded" => POD_SUCCEEDED_REASON,
        "Failed" => POD_FAILED_REASON,
        "Running" => POD_RUNNING_REASON,
        "Pending" => POD_PENDING_REASON,
        _ => POD_UNKNOWN_REASON,
    }
}

#[async_trait]
impl RunUpdater for PodManager {
    async fn update(&self, run: &mut Run, workspace: &Workspace) -> anyhow::Result<Flow> {
        let namespace = run.namespace().unwrap_or_default();
        let name = run.name_any();

        let pod = match self.cluster.pods.get(&namespace, &name).await? {
            Some(pod) => pod,
            None => {
                let pod = pods::run_pod(run, workspace, &self.image)?;
                self.cluster.pods.create(&pod).await?;

                tracing::info!(run = %name, "created pod");
                incomplete(run, POD_CREATED_REASON, "");

                return Ok(Flow::Continue(Requeue::Never));
            }
        };

        let phase = pods::pod_phase(&pod);
        let completed = phase == "Succeeded" || phase == "Failed";

        if completed {
            match pods::exit_code(&pod) {
                Some(code) => run.status_mut().exit_code = Some(code),
                None => {
                    return Err(anyhow::anyhow!(
                        "unable to retrieve container status of pod {}",
                        name
                    ))
                }
            }
        }

        conditions::set(
            &mut run.status_mut().conditions,
            COMPLETE_CONDITION,
            completed,
            reason_from_pod_phase(phase),
            "",
        );

        if phase != "Pending" {
            return Ok(Flow::Continue(Requeue::Never));
        }

        let since = match pod.creation_timestamp() {
            Some(created) => created,
            None => return Ok(Flow::Continue(Requeue::After(self.pending_timeout))),
        };

        match remaining(&since, self.pending_timeout) {
            Some(left) => Ok(Flow::Continue(Requeue::After(left))),
            None => {
                fail(
                    run,
                    POD_PENDING_TIMEOUT_REASON,
                    "Timed out waiting for pod in pending phase",
                );
                Ok(Flow::Continue(Requeue::Never))
            }
        }
    }
}

/// Drives a run from pending through to completed.
pub struct RunReconciler {
    cluster: Cluster,
    updaters: Vec<Box<dyn RunUpdater>>,
}

impl RunReconciler {
    pub fn new(cluster: Cluster, image: &str) -> Self {
        let updaters: Vec<Box<dyn RunUpdater>> = vec![
            Box::new(QueueGate::default()),
            Box::new(PodManager::new(cluster.clone(), image)),
        ];

        Self::with_updaters(cluster, updaters)
    }

    pub fn with_updaters(cluster: Cluster, updaters: Vec<Box<dyn RunUpdater>>) -> Self {
        Self { cluster, updaters }
    }

    async fn own_archive(&self, run: &Run) -> anyhow::Result<()> {
        let namespace = run.namespace().unwrap_or_default();

        // the archive may not have been uploaded yet
        let mut archive = match self
            .cluster
            .config_maps
            .get(&namespace, &run.spec.config_map)
            .await?
        {
            Some(archive) => archive,
            None => return Ok(()),
        };

        if ensure_owner(&mut archive, run)? {
            self.cluster.config_maps.replace(&archive).await?;
        }

        Ok(())
    }

    async fn update_chain(&self, run: &mut Run, workspace: &Workspace) -> anyhow::Result<Requeue> {
        let mut requeue = Requeue::Never;

        for updater in self.updaters.iter() {
            match updater.update(run, workspace).await? {
                Flow::Continue(next) => requeue = requeue.sooner(next),
                Flow::Bail(next) => return Ok(requeue.sooner(next)),
            }
        }

        Ok(requeue)
    }
}

#[async_trait]
impl Reconciler for RunReconciler {
    #[tracing::instrument(name = "run::reconcile", skip(self))]
    async fn reconcile(&self, namespace: &str, name: &str) -> anyhow::Result<Requeue> {
        let mut run = match self.cluster.runs.get(namespace, name).await? {
            Some(run) => run,
            None => return Ok(Requeue::Never),
        };

        if run.is_done() {
            return Ok(Requeue::Never);
        }

        let original_status = run.status.clone();

        let workspace = match self.cluster.workspaces.get(namespace, &run.spec.workspace).await? {
            Some(workspace) => workspace,
            None => {
                fail(&mut run, WORKSPACE_NOT_FOUND_REASON, "Workspace not found");
                run.status_mut().phase = run.derive_phase();
                self.cluster.runs.replace_status(&run).await?;

                return Ok(Requeue::Never);
            }
        };

        if ensure_owner(&mut run, &workspace)? {
            run = self.cluster.runs.replace(&run).await?;
        }

        self.own_archive(&run).await?;

        let requeue = self.update_chain(&mut run, &workspace).await?;

        run.status_mut().phase = run.derive_phase();

        if run.status != original_status {
            tracing::info!(phase = ?run.phase(), "updating run status");
            self.cluster.runs.replace_status(&run).await?;
        }

        if run.is_done() {
            return Ok(Requeue::Never);
        }

        Ok(requeue)
    }
}

/// Runs the controller until shutdown. Runs are reconciled when they change,
/// when their pod changes, and when their workspace's queue changes.
pub async fn run_controller(client: Client, reconciler: Arc<RunReconciler>) {
    let runs = Api::<Run>::all(client.clone());
    let pods = Api::<Pod>::all(client.clone());
    let workspaces = Api::<Workspace>::all(client);

    let controller = Controller::new(runs, watcher::Config::default())
        .owns(pods, watcher::Config::default())
        .watches(workspaces, watcher::Config::default(), |workspace: Workspace| {
            let namespace = workspace.namespace().unwrap_or_default();
            workspace
                .combined_queue()
                .into_iter()
                .map(|run| ObjectRef::<Run>::new(&run).within(&namespace))
                .collect::<Vec<_>>()
        })
        .shutdown_on_signal()
        .run(
            reconcile::reconcile::<Run, RunReconciler>,
            reconcile::error_policy::<Run, RunReconciler>,
            reconciler,
        );

    reconcile::drain("run", controller).await;
}
