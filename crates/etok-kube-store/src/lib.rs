mod logs;
mod store;

use std::sync::Arc;

use etok_core::Cluster;
use kube::Client;

pub use logs::KubePodLogs;
pub use store::{ClusterKubeStore, KubeStore};

pub fn kube_cluster(client: Client) -> Cluster {
    Cluster {
        workspaces: Arc::new(KubeStore::new(client.clone())),
        runs: Arc::new(KubeStore::new(client.clone())),
        check_suites: Arc::new(ClusterKubeStore::new(client.clone())),
        check_runs: Arc::new(KubeStore::new(client.clone())),
        pods: Arc::new(KubeStore::new(client.clone())),
        config_maps: Arc::new(KubeStore::new(client.clone())),
        pvcs: Arc::new(KubeStore::new(client.clone())),
        roles: Arc::new(KubeStore::new(client.clone())),
        role_bindings: Arc::new(KubeStore::new(client.clone())),
        logs: Arc::new(KubePodLogs::new(client)),
    }
}
