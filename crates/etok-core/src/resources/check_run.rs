use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{self, CREATE_REQUESTED_CONDITION};

/// Maps one GitHub check run to one connected workspace within a check suite.
///
/// `status.events` is an append-only log of what GitHub told us about the
/// check run. The current iteration, the command to run and the GitHub id are
/// all derived from it.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
#[kube(
    group = "etok.dev",
    version = "v1alpha1",
    kind = "CheckRun",
    namespaced,
    status = "CheckRunStatus",
    printcolumn = r#"{"name":"Suite","type":"string","jsonPath":".spec.checkSuiteRef"}"#,
    printcolumn = r#"{"name":"Workspace","type":"string","jsonPath":".spec.workspace"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CheckRunSpec {
    pub check_suite_ref: String,
    pub workspace: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckRunStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<CheckRunEvent>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iterations: Vec<CheckRunIteration>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckRunEvent {
    pub received: Time,
    pub kind: CheckRunEventKind,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CheckRunEventKind {
    Created { id: i64 },
    Rerequested,
    RequestedAction { action: String },
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckRunIteration {
    #[serde(default)]
    pub completed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckRunCommand {
    Plan,
    Apply,
}

impl CheckRunCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckRunCommand::Plan => "plan",
            CheckRunCommand::Apply => "apply",
        }
    }
}

impl CheckRunEvent {
    pub fn now(kind: CheckRunEventKind) -> Self {
        Self {
            received: Time(chrono::Utc::now()),
            kind,
        }
    }
}

impl CheckRun {
    pub fn events(&self) -> &[CheckRunEvent] {
        self.status
            .as_ref()
            .map(|status| status.events.as_slice())
            .unwrap_or(&[])
    }

    pub fn status_mut(&mut self) -> &mut CheckRunStatus {
        self.status.get_or_insert_with(CheckRunStatus::default)
    }

    pub fn record_event(&mut self, kind: CheckRunEventKind) {
        self.status_mut().events.push(CheckRunEvent::now(kind));
    }

    /// Each rerun or requested action starts a new iteration.
    pub fn current_iteration(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                matches!(
                    event.kind,
                    CheckRunEventKind::Rerequested | CheckRunEventKind::RequestedAction { .. }
                )
            })
            .count()
    }

    pub fn current_command(&self) -> CheckRunCommand {
        match self.events().last().map(|event| &event.kind) {
            Some(CheckRunEventKind::RequestedAction { action }) if action == "apply" => {
                CheckRunCommand::Apply
            }
            _ => CheckRunCommand::Plan,
        }
    }

    /// GitHub's id for the check run, known once GitHub has confirmed its creation.
    pub fn github_id(&self) -> Option<i64> {
        self.events()
            .iter()
            .rev()
            .find_map(|event| match event.kind {
                CheckRunEventKind::Created { id } => Some(id),
                _ => None,
            })
    }

    pub fn is_created(&self) -> bool {
        self.github_id().is_some()
    }

    pub fn is_create_requested(&self) -> bool {
        self.status
            .as_ref()
            .map(|status| conditions::is_true(&status.conditions, CREATE_REQUESTED_CONDITION))
            .unwrap_or(false)
    }

    pub fn iteration_completed(&self) -> bool {
        let iteration = self.current_iteration();
        self.status
            .as_ref()
            .and_then(|status| status.iterations.get(iteration))
            .map(|iteration| iteration.completed)
            .unwrap_or(false)
    }

    /// Records whether the current iteration has completed, growing the
    /// iteration list as required.
    pub fn set_iteration_completed(&mut self, completed: bool) {
        let iteration = self.current_iteration();
        let iterations = &mut self.status_mut().iterations;
        if iterations.len() <= iteration {
            iterations.resize(iteration + 1, CheckRunIteration::default());
        }
        iterations[iteration].completed = completed;
    }

    /// Name of the run backing the current iteration.
    pub fn run_name(&self) -> String {
        format!("{}-{}", self.name_any(), self.current_iteration())
    }

    /// Identifies this resource to GitHub, which hands it back on webhook events.
    pub fn external_id(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }
}
