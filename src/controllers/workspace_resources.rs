use std::collections::{BTreeMap, HashMap};

use handlebars::Handlebars;
use k8s_openapi::{
    api::{
        core::v1::{
            ConfigMap, PersistentVolumeClaim, PersistentVolumeClaimSpec,
            VolumeResourceRequirements,
        },
        rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject},
    },
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta},
};
use kube::{Resource, ResourceExt};

use etok_core::Workspace;

use super::pods::{common_labels, BACKEND_FILE, VARIABLES_FILE};

pub const ROLE_NAME: &str = "etok";
pub const ROLE_BINDING_NAME: &str = "etok";

const VARIABLES: &str = "variable \"namespace\" {}\nvariable \"workspace\" {}\n";

const BACKEND_TEMPLATE: &str = r#"terraform {
  backend "{{backend_type}}" {
{{#each config}}    {{@key}} = "{{this}}"
{{/each}}  }
}
"#;

fn metadata(workspace: &Workspace, name: &str) -> anyhow::Result<ObjectMeta> {
    let owner = match workspace.controller_owner_ref(&()) {
        Some(owner) => owner,
        None => {
            return Err(anyhow::anyhow!(
                "workspace {} has no uid",
                workspace.name_any()
            ))
        }
    };

    Ok(ObjectMeta {
        name: Some(name.to_string()),
        namespace: workspace.namespace(),
        labels: Some(common_labels("workspace", &workspace.name_any())),
        owner_references: Some(vec![owner]),
        ..ObjectMeta::default()
    })
}

/// Shared by every workspace in a namespace, so each workspace adds itself
/// as a non-controlling owner.
fn shared_metadata(workspace: &Workspace, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: workspace.namespace(),
        labels: Some(common_labels("workspace", &workspace.name_any())),
        ..ObjectMeta::default()
    }
}

fn rule(group: &str, resource: &str, verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(vec![resource.to_string()]),
        verbs: verbs.iter().map(|verb| verb.to_string()).collect(),
        ..PolicyRule::default()
    }
}

pub fn role(workspace: &Workspace) -> Role {
    let state_verbs = ["list", "create", "get", "delete", "patch", "update"];

    Role {
        metadata: shared_metadata(workspace, ROLE_NAME),
        rules: Some(vec![
            // lock files are persisted to new config maps owned by the run
            rule("", "configmaps", &["create"]),
            rule("etok.dev", "runs", &["get"]),
            rule("", "secrets", &state_verbs),
            rule("coordination.k8s.io", "leases", &state_verbs),
        ]),
    }
}

pub fn role_binding(workspace: &Workspace) -> RoleBinding {
    RoleBinding {
        metadata: shared_metadata(workspace, ROLE_BINDING_NAME),
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: workspace.service_account().to_string(),
            namespace: workspace.namespace(),
            api_group: None,
        }]),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: ROLE_NAME.to_string(),
        },
    }
}

pub fn pvc(workspace: &Workspace) -> anyhow::Result<PersistentVolumeClaim> {
    Ok(PersistentVolumeClaim {
        metadata: metadata(workspace, &workspace.pvc_name())?,
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(workspace.cache_size().to_string()),
                )])),
                limits: None,
            }),
            storage_class_name: workspace.spec.cache.storage_class.clone(),
            ..PersistentVolumeClaimSpec::default()
        }),
        status: None,
    })
}

fn render_backend(workspace: &Workspace) -> anyhow::Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.register_template_string("backend", BACKEND_TEMPLATE)?;

    let mut values: HashMap<&str, serde_json::Value> = HashMap::new();
    values.insert(
        "backend_type",
        serde_json::Value::String(workspace.spec.backend.backend_type.clone()),
    );
    values.insert(
        "config",
        serde_json::to_value(&workspace.spec.backend.config)?,
    );

    Ok(handlebars.render("backend", &values)?)
}

/// Files mounted alongside every run's configuration: variable declarations
/// for the values injected through `TF_VAR_*` and the backend block.
pub fn builtins(workspace: &Workspace) -> anyhow::Result<ConfigMap> {
    Ok(ConfigMap {
        metadata: metadata(workspace, &workspace.builtins_name())?,
        data: Some(BTreeMap::from([
            (VARIABLES_FILE.to_string(), VARIABLES.to_string()),
            (BACKEND_FILE.to_string(), render_backend(workspace)?),
        ])),
        ..ConfigMap::default()
    })
}

#[cfg(test)]
mod tests {
    use etok_core::test::get_workspace_fixture;

    use super::*;

    fn workspace() -> Workspace {
        let mut workspace = get_workspace_fixture("default", "networks");
        workspace.meta_mut().uid = Some("uid-1".to_string());
        workspace
    }

    #[test]
    fn test_backend_rendering() -> anyhow::Result<()> {
        let mut workspace = workspace();
        workspace.spec.backend.backend_type = "gcs".to_string();
        workspace
            .spec
            .backend
            .config
            .insert("bucket".to_string(), "state-bucket".to_string());
        workspace
            .spec
            .backend
            .config
            .insert("prefix".to_string(), "dev/networks".to_string());

        let config_map = builtins(&workspace)?;
        let data = config_map.data.unwrap();

        assert_eq!(
            data[BACKEND_FILE],
            "terraform {\n  backend \"gcs\" {\n    bucket = \"state-bucket\"\n    prefix = \"dev/networks\"\n  }\n}\n"
        );
        assert_eq!(data[VARIABLES_FILE], VARIABLES);
        assert_eq!(config_map.metadata.name.as_deref(), Some("workspace-networks"));

        Ok(())
    }

    #[test]
    fn test_default_backend() -> anyhow::Result<()> {
        let rendered = render_backend(&workspace())?;

        assert_eq!(rendered, "terraform {\n  backend \"local\" {\n  }\n}\n");

        Ok(())
    }

    #[test]
    fn test_pvc() -> anyhow::Result<()> {
        let mut workspace = workspace();
        workspace.spec.cache.storage_class = Some("standard".to_string());
        workspace.spec.cache.size = Some("5Gi".to_string());

        let pvc = pvc(&workspace)?;
        let spec = pvc.spec.unwrap();

        assert_eq!(pvc.metadata.name.as_deref(), Some("networks"));
        assert_eq!(spec.storage_class_name.as_deref(), Some("standard"));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap()["storage"],
            Quantity("5Gi".to_string())
        );

        Ok(())
    }

    #[test]
    fn test_role_binding() {
        let mut workspace = workspace();
        workspace.spec.service_account_name = Some("terraform".to_string());

        let binding = role_binding(&workspace);
        let subject = &binding.subjects.unwrap()[0];

        assert_eq!(subject.name, "terraform");
        assert_eq!(subject.namespace.as_deref(), Some("default"));
        assert_eq!(binding.role_ref.name, ROLE_NAME);
    }
}
