use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::{
    runtime::{reflector::ObjectRef, watcher, Controller},
    Api, Client, Resource, ResourceExt,
};

use etok_core::{
    labels::APPROVALS_ANNOTATION_PREFIX, store::ObjectStore, Cluster, Run, Workspace,
    WorkspacePhase,
};

use super::{ensure_owner, pods, queue::update_queue, workspace_resources};
use crate::reconcile::{self, Reconciler, Requeue};

/// Holds the workspace until its dependents have been deleted.
pub const DELETE_DEPENDENTS_FINALIZER: &str = "foregroundDeletion";

pub struct WorkspaceReconciler {
    cluster: Cluster,
    image: String,
}

fn phase_from_pod(pod: &Pod) -> WorkspacePhase {
    match pods::pod_phase(pod) {
        "Pending" => WorkspacePhase::Initializing,
        "Running" => WorkspacePhase::Ready,
        "Succeeded" | "Failed" => WorkspacePhase::Error,
        _ => WorkspacePhase::Unknown,
    }
}

/// Creates `object` unless an object of the same name exists.
async fn create_if_absent<K>(store: &Arc<dyn ObjectStore<K>>, object: K) -> anyhow::Result<bool>
where
    K: Resource<DynamicType = ()>,
{
    let namespace = object.namespace().unwrap_or_default();

    if store.get(&namespace, &object.name_any()).await?.is_some() {
        return Ok(false);
    }

    tracing::info!(name = %object.name_any(), "creating {}", K::kind(&()));
    store.create(&object).await?;

    Ok(true)
}

/// Creates a namespace-wide object, or adds the workspace as an owner of
/// the existing one.
async fn ensure_shared<K>(
    store: &Arc<dyn ObjectStore<K>>,
    workspace: &Workspace,
    object: K,
) -> anyhow::Result<()>
where
    K: Resource,
{
    let namespace = object.namespace().unwrap_or_default();

    match store.get(&namespace, &object.name_any()).await? {
        Some(mut existing) => {
            if ensure_owner(&mut existing, workspace)? {
                store.replace(&existing).await?;
            }
        }
        None => {
            let mut object = object;
            ensure_owner(&mut object, workspace)?;
            store.create(&object).await?;
        }
    }

    Ok(())
}

impl WorkspaceReconciler {
    pub fn new(cluster: Cluster, image: &str) -> Self {
        Self {
            cluster,
            image: image.to_string(),
        }
    }

    async fn update_phase(
        &self,
        workspace: Workspace,
        phase: WorkspacePhase,
    ) -> anyhow::Result<Workspace> {
        if workspace.phase() == phase {
            return Ok(workspace);
        }

        let mut workspace = workspace;
        workspace.status.get_or_insert_with(Default::default).phase = phase;

        tracing::info!(?phase, "updating workspace phase");
        self.cluster.workspaces.replace_status(&workspace).await
    }

    async fn ensure_resources(&self, workspace: &Workspace) -> anyhow::Result<()> {
        ensure_shared(
            &self.cluster.roles,
            workspace,
            workspace_resources::role(workspace),
        )
        .await?;
        ensure_shared(
            &self.cluster.role_bindings,
            workspace,
            workspace_resources::role_binding(workspace),
        )
        .await?;

        create_if_absent(&self.cluster.pvcs, workspace_resources::pvc(workspace)?).await?;
        create_if_absent(
            &self.cluster.config_maps,
            workspace_resources::builtins(workspace)?,
        )
        .await?;

        Ok(())
    }

    /// Runs of this workspace, oldest first.
    async fn list_runs(&self, workspace: &Workspace) -> anyhow::Result<Vec<Run>> {
        let namespace = workspace.namespace().unwrap_or_default();
        let name = workspace.name_any();

        let mut runs: Vec<Run> = self
            .cluster
            .runs
            .list(&namespace)
            .await?
            .into_iter()
            .filter(|run| run.spec.workspace == name)
            .collect();

        runs.sort_by(|a, b| {
            a.creation_timestamp()
                .cmp(&b.creation_timestamp())
                .then_with(|| a.name_any().cmp(&b.name_any()))
        });

        Ok(runs)
    }

    /// Drops approvals for runs that are no longer queued.
    async fn collect_approvals(&self, workspace: Workspace) -> anyhow::Result<Workspace> {
        let queued = workspace.combined_queue();

        let mut workspace = workspace;
        let annotations = workspace.annotations_mut();
        let before = annotations.len();

        annotations.retain(|key, _| match key.strip_prefix(APPROVALS_ANNOTATION_PREFIX) {
            Some(run) => queued.iter().any(|queued| queued == run),
            None => true,
        });

        if annotations.len() == before {
            return Ok(workspace);
        }

        tracing::info!("removing stale approvals");
        self.cluster.workspaces.replace(&workspace).await
    }
}

#[async_trait]
impl Reconciler for WorkspaceReconciler {
    #[tracing::instrument(name = "workspace::reconcile", skip(self))]
    async fn reconcile(&self, namespace: &str, name: &str) -> anyhow::Result<Requeue> {
        let mut workspace = match self.cluster.workspaces.get(namespace, name).await? {
            Some(workspace) => workspace,
            None => return Ok(Requeue::Never),
        };

        if workspace.meta().deletion_timestamp.is_some() {
            self.update_phase(workspace, WorkspacePhase::Deleting).await?;
            return Ok(Requeue::Never);
        }

        if !workspace
            .finalizers()
            .iter()
            .any(|finalizer| finalizer == DELETE_DEPENDENTS_FINALIZER)
        {
            workspace
                .finalizers_mut()
                .push(DELETE_DEPENDENTS_FINALIZER.to_string());
            workspace = self.cluster.workspaces.replace(&workspace).await?;
        }

        self.ensure_resources(&workspace).await?;

        let pod = match self.cluster.pods.get(namespace, &workspace.pod_name()).await? {
            Some(pod) => pod,
            None => {
                let pod = pods::workspace_pod(&workspace, &self.image)?;
                self.cluster.pods.create(&pod).await?;

                self.update_phase(workspace, WorkspacePhase::Initializing)
                    .await?;
                return Ok(Requeue::Never);
            }
        };

        workspace = self.update_phase(workspace, phase_from_pod(&pod)).await?;

        let runs = self.list_runs(&workspace).await?;
        let (active, queue) = update_queue(&workspace, &runs);

        let current_queue = workspace
            .status
            .as_ref()
            .map(|status| status.queue.clone())
            .unwrap_or_default();

        if workspace.active().map(str::to_string) != active || current_queue != queue {
            tracing::info!(?active, ?queue, "updating queue");

            let status = workspace.status.get_or_insert_with(Default::default);
            status.active = active;
            status.queue = queue;
            workspace = self.cluster.workspaces.replace_status(&workspace).await?;
        }

        self.collect_approvals(workspace).await?;

        Ok(Requeue::Never)
    }
}

/// Runs the controller until shutdown. Workspaces are reconciled when they
/// change, when their pod or volume changes, and when one of their runs
/// changes.
pub async fn workspace_controller(client: Client, reconciler: Arc<WorkspaceReconciler>) {
    let workspaces = Api::<Workspace>::all(client.clone());
    let pods = Api::<Pod>::all(client.clone());
    let pvcs = Api::<PersistentVolumeClaim>::all(client.clone());
    let runs = Api::<Run>::all(client);

    let controller = Controller::new(workspaces, watcher::Config::default())
        .owns(pods, watcher::Config::default())
        .owns(pvcs, watcher::Config::default())
        .watches(runs, watcher::Config::default(), |run: Run| {
            let namespace = run.namespace().unwrap_or_default();
            Some(ObjectRef::<Workspace>::new(&run.spec.workspace).within(&namespace))
        })
        .shutdown_on_signal()
        .run(
            reconcile::reconcile::<Workspace, WorkspaceReconciler>,
            reconcile::error_policy::<Workspace, WorkspaceReconciler>,
            reconciler,
        );

    reconcile::drain("workspace", controller).await;
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::PodStatus;

    use etok_core::{
        conditions::{self, COMPLETE_CONDITION, POD_SUCCEEDED_REASON},
        labels::{approval_key, APPROVED},
        test::{get_run_fixture, get_workspace_fixture},
        Command,
    };
    use etok_memory_store::{memory_cluster, MemoryPodLogs};

    use super::*;

    fn cluster() -> Cluster {
        memory_cluster(Arc::new(MemoryPodLogs::default()))
    }

    async fn set_pod_phase(cluster: &Cluster, phase: &str) -> anyhow::Result<()> {
        let mut pod = cluster
            .pods
            .get("default", "workspace-networks")
            .await?
            .unwrap();
        pod.status = Some(PodStatus {
            phase: Some(phase.to_string()),
            ..PodStatus::default()
        });
        cluster.pods.replace_status(&pod).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_creates_resources() -> anyhow::Result<()> {
        let cluster = cluster();
        cluster
            .workspaces
            .create(&get_workspace_fixture("default", "networks"))
            .await?;

        let reconciler = WorkspaceReconciler::new(cluster.clone(), "leg100/etok:latest");
        reconciler.reconcile("default", "networks").await?;

        let workspace = cluster.workspaces.get("default", "networks").await?.unwrap();
        assert_eq!(workspace.phase(), WorkspacePhase::Initializing);
        assert_eq!(workspace.finalizers(), &[DELETE_DEPENDENTS_FINALIZER.to_string()]);

        assert!(cluster.roles.get("default", "etok").await?.is_some());
        assert!(cluster.role_bindings.get("default", "etok").await?.is_some());
        assert!(cluster.pvcs.get("default", "networks").await?.is_some());
        assert!(cluster
            .config_maps
            .get("default", "workspace-networks")
            .await?
            .is_some());
        assert!(cluster
            .pods
            .get("default", "workspace-networks")
            .await?
            .is_some());

        // idempotent
        reconciler.reconcile("default", "networks").await?;
        assert_eq!(cluster.pods.list("default").await?.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_shared_role_owned_by_each_workspace() -> anyhow::Result<()> {
        let cluster = cluster();
        let reconciler = WorkspaceReconciler::new(cluster.clone(), "leg100/etok:latest");

        for name in ["networks", "database"] {
            cluster
                .workspaces
                .create(&get_workspace_fixture("default", name))
                .await?;
            reconciler.reconcile("default", name).await?;
        }

        let role = cluster.roles.get("default", "etok").await?.unwrap();
        assert_eq!(role.owner_references().len(), 2);
        assert_eq!(cluster.roles.list("default").await?.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_phase_follows_pod() -> anyhow::Result<()> {
        let cluster = cluster();
        cluster
            .workspaces
            .create(&get_workspace_fixture("default", "networks"))
            .await?;

        let reconciler = WorkspaceReconciler::new(cluster.clone(), "leg100/etok:latest");
        reconciler.reconcile("default", "networks").await?;

        for (pod_phase, phase) in [
            ("Pending", WorkspacePhase::Initializing),
            ("Running", WorkspacePhase::Ready),
            ("Failed", WorkspacePhase::Error),
        ] {
            set_pod_phase(&cluster, pod_phase).await?;
            reconciler.reconcile("default", "networks").await?;

            let workspace = cluster.workspaces.get("default", "networks").await?.unwrap();
            assert_eq!(workspace.phase(), phase);
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_deleting() -> anyhow::Result<()> {
        let cluster = cluster();
        let mut workspace = get_workspace_fixture("default", "networks");
        workspace.meta_mut().deletion_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()));
        cluster.workspaces.create(&workspace).await?;

        let reconciler = WorkspaceReconciler::new(cluster.clone(), "leg100/etok:latest");
        reconciler.reconcile("default", "networks").await?;

        let workspace = cluster.workspaces.get("default", "networks").await?.unwrap();
        assert_eq!(workspace.phase(), WorkspacePhase::Deleting);
        assert!(cluster.pods.list("default").await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_queue_and_approvals() -> anyhow::Result<()> {
        let cluster = cluster();
        let mut workspace = get_workspace_fixture("default", "networks");
        workspace.spec.privileged_commands = vec!["apply".to_string()];
        workspace
            .annotations_mut()
            .insert(approval_key("run-3"), APPROVED.to_string());
        workspace
            .annotations_mut()
            .insert(approval_key("run-gone"), APPROVED.to_string());
        workspace
            .annotations_mut()
            .insert("owner".to_string(), "platform".to_string());
        cluster.workspaces.create(&workspace).await?;

        for (name, command) in [
            ("run-1", Command::Sh),
            ("run-2", Command::Plan),
            ("run-3", Command::Apply),
            ("run-4", Command::Apply),
        ] {
            cluster
                .runs
                .create(&get_run_fixture("default", name, "networks", command))
                .await?;
        }

        let reconciler = WorkspaceReconciler::new(cluster.clone(), "leg100/etok:latest");
        // first reconcile creates the pod and stops there
        reconciler.reconcile("default", "networks").await?;
        reconciler.reconcile("default", "networks").await?;

        let workspace = cluster.workspaces.get("default", "networks").await?.unwrap();
        assert_eq!(workspace.active(), Some("run-1"));
        assert_eq!(workspace.status.as_ref().unwrap().queue, vec!["run-3"]);

        assert!(workspace.is_approved("run-3"));
        assert!(!workspace.annotations().contains_key(&approval_key("run-gone")));
        assert_eq!(workspace.annotations().get("owner").unwrap(), "platform");

        // completing the active run promotes the next one
        let mut sh = cluster.runs.get("default", "run-1").await?.unwrap();
        conditions::set(
            &mut sh.status_mut().conditions,
            COMPLETE_CONDITION,
            true,
            POD_SUCCEEDED_REASON,
            "",
        );
        cluster.runs.replace_status(&sh).await?;

        reconciler.reconcile("default", "networks").await?;

        let workspace = cluster.workspaces.get("default", "networks").await?.unwrap();
        assert_eq!(workspace.active(), Some("run-3"));
        assert!(workspace.status.as_ref().unwrap().queue.is_empty());

        Ok(())
    }
}
