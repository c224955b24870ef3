use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::labels::{approval_key, APPROVED};

pub const DEFAULT_CACHE_SIZE: &str = "1Gi";
pub const DEFAULT_SERVICE_ACCOUNT: &str = "etok";
pub const DEFAULT_SECRET: &str = "etok";

/// A Terraform root module bound to a backend, with its own run queue, cache
/// volume and service account.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "etok.dev",
    version = "v1alpha1",
    kind = "Workspace",
    namespaced,
    status = "WorkspaceStatus",
    shortname = "ws",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Active","type":"string","jsonPath":".status.active"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub privileged_commands: Vec<String>,

    #[serde(default)]
    pub cache: CacheSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs: Option<VcsSpec>,

    #[serde(default)]
    pub backend: BackendSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    #[serde(default)]
    pub verbosity: i32,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VcsSpec {
    pub repository: String,

    #[serde(default)]
    pub working_dir: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    #[serde(default = "default_backend_type", rename = "type")]
    pub backend_type: String,

    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

fn default_backend_type() -> String {
    "local".to_string()
}

impl Default for BackendSpec {
    fn default() -> Self {
        Self {
            backend_type: default_backend_type(),
            config: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
pub enum WorkspacePhase {
    Initializing,
    Ready,
    Error,
    #[default]
    Unknown,
    Deleting,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queue: Vec<String>,

    #[serde(default)]
    pub phase: WorkspacePhase,
}

impl Workspace {
    pub fn is_privileged(&self, command: &str) -> bool {
        self.spec.privileged_commands.iter().any(|c| c == command)
    }

    pub fn is_approved(&self, run: &str) -> bool {
        self.annotations()
            .get(&approval_key(run))
            .map(|value| value == APPROVED)
            .unwrap_or(false)
    }

    pub fn repository(&self) -> Option<&str> {
        self.spec.vcs.as_ref().map(|vcs| vcs.repository.as_str())
    }

    pub fn working_dir(&self) -> &str {
        self.spec
            .vcs
            .as_ref()
            .map(|vcs| vcs.working_dir.as_str())
            .unwrap_or("")
    }

    pub fn service_account(&self) -> &str {
        self.spec
            .service_account_name
            .as_deref()
            .unwrap_or(DEFAULT_SERVICE_ACCOUNT)
    }

    pub fn secret(&self) -> &str {
        self.spec.secret_name.as_deref().unwrap_or(DEFAULT_SECRET)
    }

    pub fn cache_size(&self) -> &str {
        self.spec.cache.size.as_deref().unwrap_or(DEFAULT_CACHE_SIZE)
    }

    pub fn pod_name(&self) -> String {
        format!("workspace-{}", self.name_any())
    }

    pub fn builtins_name(&self) -> String {
        format!("workspace-{}", self.name_any())
    }

    pub fn pvc_name(&self) -> String {
        self.name_any()
    }

    /// The run at the front of the queue, followed by every run waiting behind it.
    pub fn combined_queue(&self) -> Vec<String> {
        match &self.status {
            Some(status) => status
                .active
                .iter()
                .chain(status.queue.iter())
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn active(&self) -> Option<&str> {
        self.status.as_ref().and_then(|status| status.active.as_deref())
    }

    pub fn phase(&self) -> WorkspacePhase {
        self.status
            .as_ref()
            .map(|status| status.phase)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use crate::test::get_workspace_fixture;

    use super::*;

    #[test]
    fn test_combined_queue() {
        let mut workspace = get_workspace_fixture("default", "networks");
        assert!(workspace.combined_queue().is_empty());

        workspace.status = Some(WorkspaceStatus {
            active: Some("run-1".to_string()),
            queue: vec!["run-2".to_string(), "run-3".to_string()],
            phase: WorkspacePhase::Ready,
        });

        assert_eq!(workspace.combined_queue(), vec!["run-1", "run-2", "run-3"]);
        assert_eq!(workspace.active(), Some("run-1"));
    }

    #[test]
    fn test_approvals() {
        let mut workspace = get_workspace_fixture("default", "networks");
        workspace.spec.privileged_commands = vec!["apply".to_string()];

        assert!(workspace.is_privileged("apply"));
        assert!(!workspace.is_privileged("plan"));
        assert!(!workspace.is_approved("run-1"));

        workspace
            .annotations_mut()
            .insert(approval_key("run-1"), APPROVED.to_string());

        assert!(workspace.is_approved("run-1"));
        assert!(!workspace.is_approved("run-2"));
    }

    #[test]
    fn test_defaults() {
        let workspace = get_workspace_fixture("default", "networks");

        assert_eq!(workspace.service_account(), DEFAULT_SERVICE_ACCOUNT);
        assert_eq!(workspace.cache_size(), DEFAULT_CACHE_SIZE);
        assert_eq!(workspace.pod_name(), "workspace-networks");
        assert_eq!(workspace.phase(), WorkspacePhase::Unknown);
    }
}
