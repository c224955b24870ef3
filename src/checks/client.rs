use async_trait::async_trait;
use octocrab::{models::InstallationId, Octocrab};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A button GitHub renders on a completed check run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckRunAction {
    pub label: String,
    pub description: String,
    pub identifier: String,
}

/// Body of both the create and update check run requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CheckRunOptions {
    pub name: String,
    pub head_sha: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    pub output: CheckRunOutput,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<CheckRunAction>,
    pub external_id: String,
}

/// The slice of the GitHub API used on behalf of one app install.
#[async_trait]
pub trait GithubApi: Send + Sync {
    /// Returns GitHub's id for the new check run.
    async fn create_check_run(
        &self,
        owner: &str,
        repo: &str,
        options: &CheckRunOptions,
    ) -> anyhow::Result<i64>;

    async fn update_check_run(
        &self,
        owner: &str,
        repo: &str,
        id: i64,
        options: &CheckRunOptions,
    ) -> anyhow::Result<()>;

    /// Requests a fresh install access token.
    async fn refresh_token(&self) -> anyhow::Result<String>;
}

#[derive(Deserialize)]
struct CreatedCheckRun {
    id: i64,
}

/// Talks to GitHub as an app install. Octocrab exchanges the app's JWT for
/// install tokens and renews them as they expire.
pub struct InstallApi {
    app: Octocrab,
    install_id: InstallationId,
    crab: Octocrab,
}

impl InstallApi {
    /// `app` must be authenticated as the GitHub app.
    pub fn new(app: &Octocrab, install_id: i64) -> anyhow::Result<Self> {
        let install_id = u64::try_from(install_id)
            .map_err(|_| anyhow::anyhow!("invalid install id {}", install_id))?;

        let install_id = InstallationId(install_id);

        Ok(Self {
            app: app.clone(),
            install_id,
            crab: app.installation(install_id),
        })
    }
}

#[async_trait]
impl GithubApi for InstallApi {
    #[tracing::instrument(name = "github::create_check_run", skip(self, options))]
    async fn create_check_run(
        &self,
        owner: &str,
        repo: &str,
        options: &CheckRunOptions,
    ) -> anyhow::Result<i64> {
        let route = format!("/repos/{}/{}/check-runs", owner, repo);
        let created: CreatedCheckRun = self.crab.post(route, Some(options)).await?;

        Ok(created.id)
    }

    #[tracing::instrument(name = "github::update_check_run", skip(self, options))]
    async fn update_check_run(
        &self,
        owner: &str,
        repo: &str,
        id: i64,
        options: &CheckRunOptions,
    ) -> anyhow::Result<()> {
        let route = format!("/repos/{}/{}/check-runs/{}", owner, repo, id);

        // an update cannot move the check run to another commit
        let mut body = serde_json::to_value(options)?;
        if let Some(fields) = body.as_object_mut() {
            fields.remove("head_sha");
        }

        let _: serde_json::Value = self.crab.patch(route, Some(&body)).await?;

        Ok(())
    }

    async fn refresh_token(&self) -> anyhow::Result<String> {
        let (_, token) = self.app.installation_and_token(self.install_id).await?;

        Ok(token.expose_secret().to_string())
    }
}
