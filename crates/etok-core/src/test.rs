use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::{
    resources::VcsSpec, CheckRun, CheckRunSpec, CheckSuite, CheckSuiteSpec, Command, Run, RunSpec,
    Workspace, WorkspaceSpec, DEFAULT_CONFIG_MAP_KEY,
};

pub const FIXTURE_CLONE_URL: &str = "https://github.com/leg100/etok-e2e.git";
pub const FIXTURE_SHA: &str = "0e0ce6c3f3ec2b1b8e3e1c2dcd5e0d1a4a7c4bd2";
pub const FIXTURE_SUITE_ID: i64 = 12345;
pub const FIXTURE_INSTALL_ID: i64 = 16338139;

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: if namespace.is_empty() {
            None
        } else {
            Some(namespace.to_string())
        },
        ..ObjectMeta::default()
    }
}

pub fn get_workspace_fixture(namespace: &str, name: &str) -> Workspace {
    Workspace {
        metadata: meta(namespace, name),
        spec: WorkspaceSpec::default(),
        status: None,
    }
}

/// A workspace connected to the fixture repository.
pub fn get_connected_workspace_fixture(namespace: &str, name: &str, working_dir: &str) -> Workspace {
    let mut workspace = get_workspace_fixture(namespace, name);
    workspace.spec.vcs = Some(VcsSpec {
        repository: FIXTURE_CLONE_URL.to_string(),
        working_dir: working_dir.to_string(),
    });
    workspace
}

pub fn get_run_fixture(namespace: &str, name: &str, workspace: &str, command: Command) -> Run {
    Run {
        metadata: meta(namespace, name),
        spec: RunSpec {
            command,
            args: Vec::new(),
            workspace: workspace.to_string(),
            config_map: name.to_string(),
            config_map_key: DEFAULT_CONFIG_MAP_KEY.to_string(),
            config_map_path: String::new(),
            verbosity: 0,
        },
        status: None,
    }
}

pub fn get_check_suite_fixture() -> CheckSuite {
    CheckSuite {
        metadata: meta("", &FIXTURE_SUITE_ID.to_string()),
        spec: CheckSuiteSpec {
            check_suite_id: FIXTURE_SUITE_ID,
            branch: "changes".to_string(),
            sha: FIXTURE_SHA.to_string(),
            owner: "leg100".to_string(),
            repo: "etok-e2e".to_string(),
            clone_url: FIXTURE_CLONE_URL.to_string(),
            install_id: FIXTURE_INSTALL_ID,
        },
        status: None,
    }
}

pub fn get_check_run_fixture(namespace: &str, name: &str) -> CheckRun {
    CheckRun {
        metadata: meta(namespace, name),
        spec: CheckRunSpec {
            check_suite_ref: FIXTURE_SUITE_ID.to_string(),
            workspace: "networks".to_string(),
        },
        status: None,
    }
}
