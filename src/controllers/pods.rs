use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{
        ConfigMapVolumeSource, Container, EnvFromSource, EnvVar, PersistentVolumeClaimVolumeSource,
        Pod, PodSpec, SecretEnvSource, Volume, VolumeMount,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{Resource, ResourceExt};

use etok_core::{
    labels::{COMPONENT_LABEL, WORKSPACE_LABEL},
    logs::RUNNER_CONTAINER,
    Run, Workspace,
};

pub const WORKSPACE_DIR: &str = "/workspace";
pub const PLANS_MOUNT_PATH: &str = "/plans";
pub const VARIABLES_FILE: &str = "_etok_variables.tf";
pub const BACKEND_FILE: &str = "_etok_backend.tf";

const BIN_MOUNT_PATH: &str = "/terraform-bins";
const BIN_SUB_PATH: &str = "terraform-bins/";
const PLUGIN_MOUNT_PATH: &str = "/plugin-cache";
const PLUGIN_SUB_PATH: &str = "plugin-cache/";
const DOT_TERRAFORM_SUB_PATH: &str = ".terraform/";
const PLANS_SUB_PATH: &str = "plans/";
const TARBALL_MOUNT_PATH: &str = "/tarball";

const IDLER_CONTAINER: &str = "idler";
const IDLER_COMMAND: &str = "trap \"exit 0\" SIGTERM; while true; do sleep 1; done";

pub fn common_labels(component: &str, workspace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), "etok".to_string()),
        ("app.kubernetes.io/name".to_string(), "etok".to_string()),
        (COMPONENT_LABEL.to_string(), component.to_string()),
        (WORKSPACE_LABEL.to_string(), workspace.to_string()),
    ])
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn mount(name: &str, mount_path: &str, sub_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        sub_path: Some(sub_path.to_string()),
        ..VolumeMount::default()
    }
}

fn cache_volume(workspace: &Workspace) -> Volume {
    Volume {
        name: "cache".to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: workspace.pvc_name(),
            read_only: None,
        }),
        ..Volume::default()
    }
}

fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn join(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    format!("/{}", joined)
}

/// Builds the pod executing a run. The runner container unpacks the run's
/// source archive into the workspace directory and runs the command there.
pub fn run_pod(run: &Run, workspace: &Workspace, image: &str) -> anyhow::Result<Pod> {
    let run_name = run.name_any();
    let namespace = workspace.namespace().unwrap_or_default();
    let workspace_name = workspace.name_any();
    let working_dir = join(&[WORKSPACE_DIR, &run.spec.config_map_path]);
    let tarball = join(&[TARBALL_MOUNT_PATH, &run.spec.config_map_key]);

    let mut args = vec!["--".to_string()];
    args.extend(run.spec.args.iter().cloned());

    let container = Container {
        name: RUNNER_CONTAINER.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["etok".to_string(), "runner".to_string()]),
        args: Some(args),
        env: Some(vec![
            env("ETOK_COMMAND", run.spec.command.as_str()),
            env("ETOK_NAMESPACE", namespace.clone()),
            env("ETOK_WORKSPACE", workspace_name.clone()),
            env("ETOK_RUN_NAME", run_name.clone()),
            env("ETOK_DEST", WORKSPACE_DIR),
            env("ETOK_TARBALL", tarball.clone()),
            env("ETOK_VERBOSITY", run.spec.verbosity.to_string()),
            env("TF_PLUGIN_CACHE_DIR", PLUGIN_MOUNT_PATH),
            env("KUBE_IN_CLUSTER_CONFIG", "true"),
            env("KUBE_NAMESPACE", namespace.clone()),
            env(
                "TF_CLI_ARGS_init",
                format!("-backend-config=secret_suffix={}", workspace_name),
            ),
            env("TF_VAR_namespace", namespace.clone()),
            env("TF_VAR_workspace", workspace_name.clone()),
        ]),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: workspace.secret().to_string(),
                optional: Some(true),
            }),
            ..EnvFromSource::default()
        }]),
        termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        volume_mounts: Some(vec![
            mount("cache", PLUGIN_MOUNT_PATH, PLUGIN_SUB_PATH),
            mount("cache", BIN_MOUNT_PATH, BIN_SUB_PATH),
            mount(
                "cache",
                &join(&[&working_dir, ".terraform"]),
                DOT_TERRAFORM_SUB_PATH,
            ),
            mount("cache", PLANS_MOUNT_PATH, PLANS_SUB_PATH),
            mount("tarball", &tarball, &run.spec.config_map_key),
            mount("builtins", &join(&[&working_dir, VARIABLES_FILE]), VARIABLES_FILE),
            mount("builtins", &join(&[&working_dir, BACKEND_FILE]), BACKEND_FILE),
        ]),
        working_dir: Some(working_dir),
        ..Container::default()
    };

    let mut labels = common_labels("run", &workspace_name);
    labels.insert(
        "etok.dev/command".to_string(),
        run.spec.command.as_str().to_string(),
    );

    let owner = match run.controller_owner_ref(&()) {
        Some(owner) => owner,
        None => return Err(anyhow::anyhow!("run {} has no uid", run_name)),
    };

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(run_name),
            namespace: Some(namespace),
            labels: Some(labels),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("Never".to_string()),
            service_account_name: Some(workspace.service_account().to_string()),
            volumes: Some(vec![
                cache_volume(workspace),
                config_map_volume("tarball", &run.spec.config_map),
                config_map_volume("builtins", &workspace.builtins_name()),
            ]),
            ..PodSpec::default()
        }),
        status: None,
    })
}

/// Builds the long-lived pod that keeps a workspace's cache volume attached
/// to a node.
pub fn workspace_pod(workspace: &Workspace, image: &str) -> anyhow::Result<Pod> {
    let owner = match workspace.controller_owner_ref(&()) {
        Some(owner) => owner,
        None => {
            return Err(anyhow::anyhow!(
                "workspace {} has no uid",
                workspace.name_any()
            ))
        }
    };

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(workspace.pod_name()),
            namespace: workspace.namespace(),
            labels: Some(common_labels("workspace", &workspace.name_any())),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: IDLER_CONTAINER.to_string(),
                image: Some(image.to_string()),
                image_pull_policy: Some("IfNotPresent".to_string()),
                command: Some(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    IDLER_COMMAND.to_string(),
                ]),
                termination_message_policy: Some("FallbackToLogsOnError".to_string()),
                volume_mounts: Some(vec![mount("cache", BIN_MOUNT_PATH, BIN_SUB_PATH)]),
                ..Container::default()
            }],
            restart_policy: Some("Always".to_string()),
            service_account_name: Some(workspace.service_account().to_string()),
            volumes: Some(vec![cache_volume(workspace)]),
            ..PodSpec::default()
        }),
        status: None,
    })
}

/// Exit code of the runner container, once it has terminated.
pub fn exit_code(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|status| status.name == RUNNER_CONTAINER)?
        .state
        .as_ref()?
        .terminated
        .as_ref()
        .map(|terminated| terminated.exit_code)
}

pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or("Unknown")
}
