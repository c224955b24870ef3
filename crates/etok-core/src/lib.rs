pub mod cluster;
pub mod conditions;
pub mod labels;
pub mod logs;
pub mod resources;
pub mod store;
pub mod test;

pub use cluster::Cluster;
pub use logs::PodLogs;
pub use resources::{
    CheckRun, CheckRunCommand, CheckRunEvent, CheckRunEventKind, CheckRunIteration, CheckRunSpec,
    CheckRunStatus, CheckSuite, CheckSuiteSpec, CheckSuiteStatus, Command, Run, RunPhase, RunSpec,
    RunStatus, Workspace, WorkspacePhase, WorkspaceSpec, WorkspaceStatus, DEFAULT_CONFIG_MAP_KEY,
};
pub use store::ObjectStore;
