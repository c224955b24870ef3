use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{self, COMPLETE_CONDITION, FAILED_CONDITION};

pub const DEFAULT_CONFIG_MAP_KEY: &str = "config.tar.gz";

/// A single Terraform (or shell) invocation against a workspace.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "etok.dev",
    version = "v1alpha1",
    kind = "Run",
    namespaced,
    status = "RunStatus",
    printcolumn = r#"{"name":"Command","type":"string","jsonPath":".spec.command"}"#,
    printcolumn = r#"{"name":"Workspace","type":"string","jsonPath":".spec.workspace"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    pub command: Command,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    pub workspace: String,

    pub config_map: String,

    #[serde(default = "default_config_map_key")]
    pub config_map_key: String,

    #[serde(default)]
    pub config_map_path: String,

    #[serde(default)]
    pub verbosity: i32,
}

fn default_config_map_key() -> String {
    DEFAULT_CONFIG_MAP_KEY.to_string()
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Apply,
    Destroy,
    Plan,
    Sh,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Apply => "apply",
            Command::Destroy => "destroy",
            Command::Plan => "plan",
            Command::Sh => "sh",
        }
    }

    /// Queueable commands hold the workspace exclusively while they run.
    pub fn is_queueable(&self) -> bool {
        !matches!(self, Command::Plan)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    #[default]
    Unknown,
    Pending,
    Queued,
    Provisioning,
    Running,
    Completed,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    #[serde(default)]
    pub phase: RunPhase,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl Run {
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or(&[])
    }

    pub fn phase(&self) -> RunPhase {
        self.status
            .as_ref()
            .map(|status| status.phase)
            .unwrap_or_default()
    }

    pub fn is_done(&self) -> bool {
        conditions::is_true(self.conditions(), COMPLETE_CONDITION)
            || conditions::is_true(self.conditions(), FAILED_CONDITION)
    }

    /// Whether the runner container has logs worth reading: it is running, or
    /// its pod ran to completion.
    pub fn is_streamable(&self) -> bool {
        self.phase() == RunPhase::Running
            || conditions::is_true(self.conditions(), COMPLETE_CONDITION)
    }

    pub fn status_mut(&mut self) -> &mut RunStatus {
        self.status.get_or_insert_with(RunStatus::default)
    }

    /// Phase as implied by the current conditions.
    pub fn derive_phase(&self) -> RunPhase {
        if self.is_done() {
            return RunPhase::Completed;
        }

        match conditions::find(self.conditions(), COMPLETE_CONDITION) {
            Some(complete) => match complete.reason.as_str() {
                conditions::UNQUEUED_REASON => RunPhase::Pending,
                conditions::QUEUED_REASON => RunPhase::Queued,
                conditions::POD_CREATED_REASON | conditions::POD_PENDING_REASON => {
                    RunPhase::Provisioning
                }
                conditions::POD_RUNNING_REASON => RunPhase::Running,
                _ => RunPhase::Unknown,
            },
            None => RunPhase::Unknown,
        }
    }
}
