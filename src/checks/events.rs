use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Deserialize;

use etok_core::{CheckRunEventKind, CheckSuite, CheckSuiteSpec, Cluster};

#[derive(Clone, Debug, Deserialize)]
pub struct Account {
    pub login: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: Account,
    pub clone_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Installation {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CheckSuiteDetail {
    pub id: i64,
    #[serde(default)]
    pub head_branch: Option<String>,
    pub head_sha: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CheckSuiteWebhook {
    pub action: String,
    pub check_suite: CheckSuiteDetail,
    pub repository: Repository,
    pub installation: Installation,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CheckRunDetail {
    pub id: i64,
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RequestedAction {
    pub identifier: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CheckRunWebhook {
    pub action: String,
    pub check_run: CheckRunDetail,
    #[serde(default)]
    pub requested_action: Option<RequestedAction>,
}

/// The webhook events GitHub delivers to the app.
#[derive(Clone, Debug)]
pub enum Event {
    CheckSuite(CheckSuiteWebhook),
    CheckRun(CheckRunWebhook),
    PullRequest,
    Unsupported(String),
}

impl Event {
    /// Decodes a delivery given its `X-GitHub-Event` header.
    pub fn parse(kind: &str, body: &[u8]) -> anyhow::Result<Event> {
        match kind {
            "check_suite" => Ok(Event::CheckSuite(serde_json::from_slice(body)?)),
            "check_run" => Ok(Event::CheckRun(serde_json::from_slice(body)?)),
            "pull_request" => Ok(Event::PullRequest),
            other => Ok(Event::Unsupported(other.to_string())),
        }
    }
}

/// Applies webhook events to the cluster's check suites and check runs.
#[derive(Clone)]
pub struct EventHandler {
    cluster: Cluster,
}

impl EventHandler {
    pub fn new(cluster: Cluster) -> Self {
        Self { cluster }
    }

    pub async fn handle(&self, event: Event) -> anyhow::Result<()> {
        match event {
            Event::CheckSuite(event) => self.check_suite(event).await,
            Event::CheckRun(event) => self.check_run(event).await,
            Event::PullRequest => Ok(()),
            Event::Unsupported(kind) => {
                tracing::debug!(kind = %kind, "ignoring event");
                Ok(())
            }
        }
    }

    #[tracing::instrument(name = "events::check_suite", skip(self, event), fields(id = event.check_suite.id, action = %event.action))]
    async fn check_suite(&self, event: CheckSuiteWebhook) -> anyhow::Result<()> {
        if event.action != "requested" && event.action != "rerequested" {
            return Ok(());
        }

        let name = event.check_suite.id.to_string();

        if self.cluster.check_suites.get("", &name).await?.is_none() {
            let suite = CheckSuite {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    ..ObjectMeta::default()
                },
                spec: CheckSuiteSpec {
                    check_suite_id: event.check_suite.id,
                    branch: event.check_suite.head_branch.unwrap_or_default(),
                    sha: event.check_suite.head_sha,
                    owner: event.repository.owner.login,
                    repo: event.repository.name,
                    clone_url: event.repository.clone_url,
                    install_id: event.installation.id,
                },
                status: None,
            };
            self.cluster.check_suites.create(&suite).await?;

            tracing::info!("created check suite");

            return Ok(());
        }

        if event.action == "rerequested" {
            let check_runs = self.cluster.check_runs.list("").await?;
            for mut check_run in check_runs
                .into_iter()
                .filter(|check_run| check_run.spec.check_suite_ref == name)
            {
                check_run.record_event(CheckRunEventKind::Rerequested);
                self.cluster.check_runs.replace_status(&check_run).await?;
            }
        }

        Ok(())
    }

    #[tracing::instrument(name = "events::check_run", skip(self, event), fields(id = event.check_run.id, action = %event.action))]
    async fn check_run(&self, event: CheckRunWebhook) -> anyhow::Result<()> {
        let kind = match (event.action.as_str(), &event.requested_action) {
            ("created", _) => CheckRunEventKind::Created {
                id: event.check_run.id,
            },
            ("rerequested", _) => CheckRunEventKind::Rerequested,
            ("requested_action", Some(requested)) => CheckRunEventKind::RequestedAction {
                action: requested.identifier.clone(),
            },
            _ => return Ok(()),
        };

        let external_id = event.check_run.external_id.unwrap_or_default();
        let (namespace, name) = match external_id.split_once('/') {
            Some(parts) => parts,
            None => {
                tracing::debug!(external_id = %external_id, "check run not created by etok");
                return Ok(());
            }
        };

        let mut check_run = match self.cluster.check_runs.get(namespace, name).await? {
            Some(check_run) => check_run,
            None => {
                tracing::warn!(namespace, name, "check run not found");
                return Ok(());
            }
        };

        check_run.record_event(kind);
        self.cluster.check_runs.replace_status(&check_run).await?;

        Ok(())
    }
}
