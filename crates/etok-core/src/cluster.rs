use std::sync::Arc;

use k8s_openapi::api::{
    core::v1::{ConfigMap, PersistentVolumeClaim, Pod},
    rbac::v1::{Role, RoleBinding},
};

use crate::{CheckRun, CheckSuite, ObjectStore, PodLogs, Run, Workspace};

/// The object stores the reconcilers read and write.
#[derive(Clone)]
pub struct Cluster {
    pub workspaces: Arc<dyn ObjectStore<Workspace>>,
    pub runs: Arc<dyn ObjectStore<Run>>,
    pub check_suites: Arc<dyn ObjectStore<CheckSuite>>,
    pub check_runs: Arc<dyn ObjectStore<CheckRun>>,
    pub pods: Arc<dyn ObjectStore<Pod>>,
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub pvcs: Arc<dyn ObjectStore<PersistentVolumeClaim>>,
    pub roles: Arc<dyn ObjectStore<Role>>,
    pub role_bindings: Arc<dyn ObjectStore<RoleBinding>>,
    pub logs: Arc<dyn PodLogs>,
}
