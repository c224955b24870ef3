mod logs;
mod store;

use std::sync::Arc;

use etok_core::Cluster;

pub use logs::MemoryPodLogs;
pub use store::MemoryStore;

/// A cluster backed entirely by memory, reading pod logs from `logs`.
pub fn memory_cluster(logs: Arc<MemoryPodLogs>) -> Cluster {
    Cluster {
        workspaces: Arc::new(MemoryStore::default()),
        runs: Arc::new(MemoryStore::default()),
        check_suites: Arc::new(MemoryStore::default()),
        check_runs: Arc::new(MemoryStore::default()),
        pods: Arc::new(MemoryStore::default()),
        config_maps: Arc::new(MemoryStore::default()),
        pvcs: Arc::new(MemoryStore::default()),
        roles: Arc::new(MemoryStore::default()),
        role_bindings: Arc::new(MemoryStore::default()),
        logs,
    }
}
