use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    runtime::{reflector::ObjectRef, watcher, Controller},
    Api, Client, Resource, ResourceExt,
};

use etok_core::{CheckRun, CheckRunSpec, CheckSuite, CheckSuiteStatus, Cluster, Workspace};

use super::repo_manager::RepoManager;
use crate::reconcile::{self, Reconciler, Requeue};

/// Clones the suite's commit and fans it out into one check run per
/// workspace connected to the suite's repository.
pub struct CheckSuiteReconciler {
    cluster: Cluster,
    repos: Arc<RepoManager>,
}

impl CheckSuiteReconciler {
    pub fn new(cluster: Cluster, repos: Arc<RepoManager>) -> Self {
        Self { cluster, repos }
    }

    async fn connected_workspaces(&self, suite: &CheckSuite) -> anyhow::Result<Vec<Workspace>> {
        let workspaces = self.cluster.workspaces.list("").await?;

        Ok(workspaces
            .into_iter()
            .filter(|workspace| workspace.repository() == Some(suite.spec.clone_url.as_str()))
            .collect())
    }

    async fn ensure_check_run(
        &self,
        suite: &CheckSuite,
        workspace: &Workspace,
    ) -> anyhow::Result<()> {
        let namespace = workspace.namespace().unwrap_or_default();
        let name = format!("{}-{}", suite.name_any(), workspace.name_any());

        if self.cluster.check_runs.get(&namespace, &name).await?.is_some() {
            return Ok(());
        }

        let owner = match suite.controller_owner_ref(&()) {
            Some(owner) => owner,
            None => return Err(anyhow::anyhow!("check suite {} has no uid", suite.name_any())),
        };

        let check_run = CheckRun {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                owner_references: Some(vec![owner]),
                ..ObjectMeta::default()
            },
            spec: CheckRunSpec {
                check_suite_ref: suite.name_any(),
                workspace: workspace.name_any(),
            },
            status: None,
        };

        self.cluster.check_runs.create(&check_run).await?;

        tracing::info!(namespace = %namespace, name = %name, "created check run");

        Ok(())
    }
}

#[async_trait]
impl Reconciler for CheckSuiteReconciler {
    #[tracing::instrument(name = "check_suite::reconcile", skip(self, _namespace))]
    async fn reconcile(&self, _namespace: &str, name: &str) -> anyhow::Result<Requeue> {
        let mut suite = match self.cluster.check_suites.get("", name).await? {
            Some(suite) => suite,
            None => return Ok(Requeue::Never),
        };

        let workspaces = self.connected_workspaces(&suite).await?;
        if workspaces.is_empty() {
            tracing::info!(repo = %suite.spec.clone_url, "no connected workspaces");
            return Ok(Requeue::Never);
        }

        let path = self.repos.clone_repo(&suite.spec).await?;
        let repo_path = path.display().to_string();

        if suite.repo_path() != Some(repo_path.as_str()) {
            suite.status = Some(CheckSuiteStatus {
                repo_path: Some(repo_path),
            });
            suite = self.cluster.check_suites.replace_status(&suite).await?;
        }

        for workspace in &workspaces {
            self.ensure_check_run(&suite, workspace).await?;
        }

        Ok(Requeue::Never)
    }
}

/// Reconciles check suites as they are created and whenever one of their
/// check runs changes.
pub async fn check_suite_controller(client: Client, reconciler: Arc<CheckSuiteReconciler>) {
    let check_suites = Api::<CheckSuite>::all(client.clone());
    let check_runs = Api::<CheckRun>::all(client);

    let controller = Controller::new(check_suites, watcher::Config::default())
        .watches(check_runs, watcher::Config::default(), |check_run: CheckRun| {
            // suites are cluster scoped, so the ref carries no namespace
            Some(ObjectRef::<CheckSuite>::new(&check_run.spec.check_suite_ref))
        })
        .shutdown_on_signal()
        .run(
            reconcile::reconcile::<CheckSuite, CheckSuiteReconciler>,
            reconcile::error_policy::<CheckSuite, CheckSuiteReconciler>,
            reconciler,
        );

    reconcile::drain("check_suite", controller).await;
}
