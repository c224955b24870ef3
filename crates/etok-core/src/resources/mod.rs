mod check_run;
mod check_suite;
mod run;
mod workspace;

pub use check_run::{
    CheckRun, CheckRunCommand, CheckRunEvent, CheckRunEventKind, CheckRunIteration, CheckRunSpec,
    CheckRunStatus,
};
pub use check_suite::{CheckSuite, CheckSuiteSpec, CheckSuiteStatus};
pub use run::{Command, Run, RunPhase, RunSpec, RunStatus, DEFAULT_CONFIG_MAP_KEY};
pub use workspace::{
    BackendSpec, CacheSpec, VcsSpec, Workspace, WorkspacePhase, WorkspaceSpec, WorkspaceStatus,
};
