use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Mirrors a GitHub check suite. Cluster scoped so that check runs in any
/// namespace can be owned by it.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
#[kube(
    group = "etok.dev",
    version = "v1alpha1",
    kind = "CheckSuite",
    status = "CheckSuiteStatus",
    printcolumn = r#"{"name":"Repo","type":"string","jsonPath":".spec.repo"}"#,
    printcolumn = r#"{"name":"SHA","type":"string","jsonPath":".spec.sha"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CheckSuiteSpec {
    pub check_suite_id: i64,
    pub branch: String,
    pub sha: String,
    pub owner: String,
    pub repo: String,
    #[serde(rename = "cloneURL")]
    pub clone_url: String,
    #[serde(rename = "installID")]
    pub install_id: i64,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckSuiteStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
}

impl CheckSuite {
    pub fn repo_path(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|status| status.repo_path.as_deref())
    }
}
