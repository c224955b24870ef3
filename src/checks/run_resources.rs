use std::{
    collections::{BTreeMap, HashMap},
    fs,
    io::Write,
    path::Path,
};

use flate2::{write::GzEncoder, Compression};
use handlebars::Handlebars;
use k8s_openapi::{
    api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta, ByteString,
};
use kube::{Resource, ResourceExt};

use etok_core::{
    labels::{
        self, CREATED_BY_LABEL, GITHUB_CHECK_RUN_ID_LABEL, GITHUB_CHECK_RUN_NAME_LABEL,
        GITHUB_COMMAND_LABEL, GITHUB_INSTALL_ID_LABEL, GITHUB_OWNER_LABEL, GITHUB_REPO_LABEL, GITHUB_SHA_LABEL,
        GITHUB_TRIGGERED_LABEL,
    },
    CheckRun, CheckRunCommand, CheckSuite, Command, Run, RunSpec, Workspace,
    DEFAULT_CONFIG_MAP_KEY,
};

use crate::controllers::pods::PLANS_MOUNT_PATH;

/// Config maps cannot hold more than this.
pub const MAX_CONFIG_SIZE: usize = 1024 * 1024;

const CREATED_BY: &str = "checkrun-controller";

const SKIPPED_DIRS: [&str; 2] = [".git", ".terraform"];

const SCRIPT_TEMPLATE: &str = r#"set -e

terraform init -input=false -no-color
{{#if apply}}
terraform apply -input=false -no-color {{plan_path}}
{{else}}
terraform plan -input=false -no-color -out={{plan_path}}
{{/if}}
"#;

/// The shell script a check run's run executes.
pub fn script(check_run: &CheckRun) -> anyhow::Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.register_template_string("script", SCRIPT_TEMPLATE)?;

    let mut values: HashMap<&str, serde_json::Value> = HashMap::new();
    values.insert(
        "apply",
        serde_json::Value::Bool(check_run.current_command() == CheckRunCommand::Apply),
    );
    values.insert(
        "plan_path",
        serde_json::Value::String(format!("{}/{}", PLANS_MOUNT_PATH, check_run.name_any())),
    );

    Ok(handlebars.render("script", &values)?)
}

fn append_dir<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    dir: &Path,
) -> anyhow::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let relative = path.strip_prefix(root)?;
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if SKIPPED_DIRS
                .iter()
                .any(|skipped| entry.file_name() == *skipped)
            {
                continue;
            }
            builder.append_dir(relative, &path)?;
            append_dir(builder, root, &path)?;
        } else if file_type.is_file() {
            builder.append_path_with_name(&path, relative)?;
        }
    }

    Ok(())
}

/// Packs `working_dir` as a gzipped tarball, with paths relative to the repo
/// root so that modules referenced from parent directories keep resolving.
pub fn archive(repo_path: &Path, working_dir: &str) -> anyhow::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    append_dir(&mut builder, repo_path, &repo_path.join(working_dir))?;
    let compressed = builder.into_inner()?.finish()?;

    if compressed.len() > MAX_CONFIG_SIZE {
        return Err(anyhow::anyhow!(
            "max config size exceeded ({} bytes)",
            compressed.len()
        ));
    }

    Ok(compressed)
}

fn correlation_labels(
    check_run: &CheckRun,
    suite: &CheckSuite,
) -> anyhow::Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::from([
        (CREATED_BY_LABEL.to_string(), CREATED_BY.to_string()),
        (GITHUB_CHECK_RUN_NAME_LABEL.to_string(), check_run.name_any()),
        (GITHUB_SHA_LABEL.to_string(), suite.spec.sha.clone()),
        (GITHUB_OWNER_LABEL.to_string(), suite.spec.owner.clone()),
        (GITHUB_REPO_LABEL.to_string(), suite.spec.repo.clone()),
        (
            GITHUB_COMMAND_LABEL.to_string(),
            check_run.current_command().as_str().to_string(),
        ),
        (
            GITHUB_INSTALL_ID_LABEL.to_string(),
            suite.spec.install_id.to_string(),
        ),
        (GITHUB_TRIGGERED_LABEL.to_string(), "true".to_string()),
    ]);

    // unknown until GitHub acknowledges the check run
    if let Some(id) = check_run.github_id() {
        labels.insert(GITHUB_CHECK_RUN_ID_LABEL.to_string(), id.to_string());
    }

    for value in labels.values() {
        labels::validate_label_value(value)?;
    }

    Ok(labels)
}

/// Builds the run for the check run's current iteration along with the
/// config map holding its configuration.
pub fn run_resources(
    check_run: &CheckRun,
    suite: &CheckSuite,
    workspace: &Workspace,
    repo_path: &Path,
) -> anyhow::Result<(Run, ConfigMap)> {
    let owner = match check_run.controller_owner_ref(&()) {
        Some(owner) => owner,
        None => {
            return Err(anyhow::anyhow!(
                "check run {} has no uid",
                check_run.name_any()
            ))
        }
    };

    let name = check_run.run_name();
    let labels = correlation_labels(check_run, suite)?;
    let working_dir = workspace.working_dir().to_string();

    let metadata = ObjectMeta {
        name: Some(name.clone()),
        namespace: check_run.namespace(),
        labels: Some(labels),
        owner_references: Some(vec![owner]),
        ..ObjectMeta::default()
    };

    let run = Run {
        metadata: metadata.clone(),
        spec: RunSpec {
            command: Command::Sh,
            args: vec!["-c".to_string(), script(check_run)?],
            workspace: workspace.name_any(),
            config_map: name.clone(),
            config_map_key: DEFAULT_CONFIG_MAP_KEY.to_string(),
            config_map_path: working_dir.clone(),
            verbosity: workspace.spec.verbosity,
        },
        status: None,
    };

    let config_map = ConfigMap {
        metadata,
        binary_data: Some(BTreeMap::from([(
            DEFAULT_CONFIG_MAP_KEY.to_string(),
            ByteString(archive(repo_path, &working_dir)?),
        )])),
        ..ConfigMap::default()
    };

    Ok((run, config_map))
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use etok_core::{
        test::{get_check_run_fixture, get_check_suite_fixture, get_connected_workspace_fixture},
        CheckRunEventKind,
    };
    use flate2::read::GzDecoder;

    use super::*;

    fn write_repo(root: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(root.join(".git/objects"))?;
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/changes\n")?;
        fs::create_dir_all(root.join("modules/vpc"))?;
        fs::write(root.join("modules/vpc/main.tf"), "resource \"null_resource\" \"vpc\" {}\n")?;
        fs::create_dir_all(root.join("networks/.terraform/providers"))?;
        fs::write(root.join("networks/.terraform/providers/big"), "binary")?;
        fs::write(root.join("networks/main.tf"), "module \"vpc\" { source = \"../modules/vpc\" }\n")?;
        fs::write(root.join("README.md"), "# etok-e2e\n")?;
        Ok(())
    }

    fn entries(archive: &[u8]) -> anyhow::Result<Vec<String>> {
        let mut tarball = tar::Archive::new(GzDecoder::new(archive));
        let mut paths = Vec::new();
        for entry in tarball.entries()? {
            paths.push(entry?.path()?.display().to_string());
        }
        Ok(paths)
    }

    #[test]
    fn test_plan_script() -> anyhow::Result<()> {
        let check_run = get_check_run_fixture("default", "12345-networks");

        assert_eq!(
            script(&check_run)?,
            "set -e\n\nterraform init -input=false -no-color\nterraform plan -input=false -no-color -out=/plans/12345-networks\n"
        );

        Ok(())
    }

    #[test]
    fn test_apply_script() -> anyhow::Result<()> {
        let mut check_run = get_check_run_fixture("default", "12345-networks");
        check_run.record_event(CheckRunEventKind::RequestedAction {
            action: "apply".to_string(),
        });

        assert!(script(&check_run)?
            .contains("terraform apply -input=false -no-color /plans/12345-networks\n"));

        Ok(())
    }

    #[test]
    fn test_archive_working_dir() -> anyhow::Result<()> {
        let repo = tempfile::tempdir()?;
        write_repo(repo.path())?;

        let paths = entries(&archive(repo.path(), "networks")?)?;

        assert_eq!(paths, vec!["networks/main.tf"]);

        Ok(())
    }

    #[test]
    fn test_archive_repo_root() -> anyhow::Result<()> {
        let repo = tempfile::tempdir()?;
        write_repo(repo.path())?;

        let paths = entries(&archive(repo.path(), "")?)?;

        assert!(paths.contains(&"README.md".to_string()));
        assert!(paths.contains(&"modules/vpc/main.tf".to_string()));
        assert!(paths.contains(&"networks/main.tf".to_string()));
        assert!(paths.iter().all(|path| !path.contains(".git") && !path.contains(".terraform")));

        Ok(())
    }

    #[test]
    fn test_archive_too_large() -> anyhow::Result<()> {
        let repo = tempfile::tempdir()?;
        let mut noise = Vec::with_capacity(2 * MAX_CONFIG_SIZE);
        let mut state: u32 = 1;
        while noise.len() < 2 * MAX_CONFIG_SIZE {
            // xorshift, so the data doesn't compress
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            noise.extend_from_slice(&state.to_le_bytes());
        }
        fs::write(repo.path().join("big.tfstate"), noise)?;

        let err = archive(repo.path(), "").unwrap_err();
        assert!(err.to_string().starts_with("max config size exceeded"));

        Ok(())
    }

    #[test]
    fn test_run_resources() -> anyhow::Result<()> {
        let repo = tempfile::tempdir()?;
        write_repo(repo.path())?;

        let mut check_run = get_check_run_fixture("default", "12345-networks");
        check_run.meta_mut().uid = Some("uid-1".to_string());
        let suite = get_check_suite_fixture();
        let workspace = get_connected_workspace_fixture("default", "networks", "networks");

        let (run, config_map) = run_resources(&check_run, &suite, &workspace, repo.path())?;

        assert_eq!(run.name_any(), "12345-networks-0");
        assert_eq!(run.spec.command, Command::Sh);
        assert_eq!(run.spec.args[0], "-c");
        assert_eq!(run.spec.config_map, "12345-networks-0");
        assert_eq!(run.spec.config_map_path, "networks");
        assert_eq!(run.labels()[GITHUB_COMMAND_LABEL], "plan");
        assert_eq!(run.labels()[GITHUB_INSTALL_ID_LABEL], "16338139");
        assert_eq!(run.labels()[GITHUB_CHECK_RUN_NAME_LABEL], "12345-networks");
        assert!(!run.labels().contains_key(GITHUB_CHECK_RUN_ID_LABEL));
        assert_eq!(run.owner_references()[0].controller, Some(true));

        let mut tarball = Vec::new();
        let data = &config_map.binary_data.unwrap()[DEFAULT_CONFIG_MAP_KEY];
        GzDecoder::new(data.0.as_slice()).read_to_end(&mut tarball)?;
        assert!(!tarball.is_empty());

        Ok(())
    }

    #[test]
    fn test_run_resources_labels_github_id() -> anyhow::Result<()> {
        let repo = tempfile::tempdir()?;
        write_repo(repo.path())?;

        let mut check_run = get_check_run_fixture("default", "12345-networks");
        check_run.meta_mut().uid = Some("uid-1".to_string());
        check_run.record_event(CheckRunEventKind::Created { id: 4242 });
        let workspace = get_connected_workspace_fixture("default", "networks", "networks");

        let (run, config_map) =
            run_resources(&check_run, &get_check_suite_fixture(), &workspace, repo.path())?;

        assert_eq!(run.labels()[GITHUB_CHECK_RUN_ID_LABEL], "4242");
        assert_eq!(config_map.labels()[GITHUB_CHECK_RUN_ID_LABEL], "4242");

        Ok(())
    }

    #[test]
    fn test_run_resources_requires_uid() -> anyhow::Result<()> {
        let repo = tempfile::tempdir()?;
        let check_run = get_check_run_fixture("default", "12345-networks");
        let workspace = get_connected_workspace_fixture("default", "networks", "");

        assert!(run_resources(&check_run, &get_check_suite_fixture(), &workspace, repo.path()).is_err());

        Ok(())
    }
}
