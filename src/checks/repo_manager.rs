use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use git2::{build::RepoBuilder, Cred, FetchOptions, RemoteCallbacks};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use etok_core::CheckSuiteSpec;

pub const DEFAULT_REPO_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

const TOKEN_USERNAME: &str = "x-access-token";
const REDACTED: &str = "xxxxx";

/// Hands out short lived tokens for an app install, used to authenticate clones.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, install_id: i64) -> anyhow::Result<String>;
}

/// Shallow clones a single branch into an empty directory.
pub trait Cloner: Send + Sync {
    fn clone_branch(&self, url: &str, branch: &str, token: &str, path: &Path)
        -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct Git2Cloner;

impl Cloner for Git2Cloner {
    fn clone_branch(
        &self,
        url: &str,
        branch: &str,
        token: &str,
        path: &Path,
    ) -> anyhow::Result<()> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(|_url, _username, _allowed_types| {
            Cred::userpass_plaintext(TOKEN_USERNAME, token)
        });

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);
        fetch_options.depth(1);

        RepoBuilder::new()
            .branch(branch)
            .fetch_options(fetch_options)
            .clone(url, path)
            .map_err(|err| {
                anyhow::anyhow!(
                    "unable to clone {}: {}",
                    redact(&with_token(url, token)),
                    err.to_string().replace(token, REDACTED)
                )
            })?;

        Ok(())
    }
}

/// The url with the token as its credentials, as git would be given it on
/// the command line.
fn with_token(url: &str, token: &str) -> String {
    let mut parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return url.to_string(),
    };

    if parsed.set_username(TOKEN_USERNAME).is_err() || parsed.set_password(Some(token)).is_err() {
        return url.to_string();
    }

    parsed.to_string()
}

/// Strips any credentials from a url before it is logged or returned in an error.
pub fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some(REDACTED));
            }
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct Repo {
    pub url: String,
    pub branch: String,
    pub sha: String,
    pub owner: String,
    pub name: String,
    pub path: PathBuf,
    last_cloned: Instant,
}

/// Keeps one clone per commit on local disk, reaping clones that haven't been
/// asked for within the ttl.
pub struct RepoManager {
    clone_dir: PathBuf,
    ttl: Duration,
    managed: Mutex<HashMap<String, Repo>>,
    tokens: Arc<dyn TokenProvider>,
    cloner: Arc<dyn Cloner>,
}

impl RepoManager {
    pub fn new(
        clone_dir: impl Into<PathBuf>,
        tokens: Arc<dyn TokenProvider>,
        cloner: Arc<dyn Cloner>,
    ) -> Self {
        Self {
            clone_dir: clone_dir.into(),
            ttl: DEFAULT_REPO_TTL,
            managed: Mutex::new(HashMap::new()),
            tokens,
            cloner,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Clones the suite's commit, or returns the existing clone, renewing its ttl.
    #[tracing::instrument(name = "repo_manager::clone", skip(self, suite), fields(sha = %suite.sha))]
    pub async fn clone_repo(&self, suite: &CheckSuiteSpec) -> anyhow::Result<PathBuf> {
        // held across the clone so concurrent requests for a commit clone it once
        let mut managed = self.managed.lock().await;

        if let Some(repo) = managed.get_mut(&suite.sha) {
            repo.last_cloned = Instant::now();
            return Ok(repo.path.clone());
        }

        let path = self.clone_dir.join(&suite.sha);
        if tokio::fs::metadata(&path).await.is_ok() {
            tokio::fs::remove_dir_all(&path).await?;
        }
        tokio::fs::create_dir_all(&path).await?;

        let token = self.tokens.token(suite.install_id).await?;

        let cloner = Arc::clone(&self.cloner);
        let url = suite.clone_url.clone();
        let branch = suite.branch.clone();
        let clone_path = path.clone();
        tokio::task::spawn_blocking(move || {
            cloner.clone_branch(&url, &branch, &token, &clone_path)
        })
        .await??;

        tracing::info!(url = %redact(&suite.clone_url), path = %path.display(), "cloned repo");

        managed.insert(
            suite.sha.clone(),
            Repo {
                url: suite.clone_url.clone(),
                branch: suite.branch.clone(),
                sha: suite.sha.clone(),
                owner: suite.owner.clone(),
                name: suite.repo.clone(),
                path: path.clone(),
                last_cloned: Instant::now(),
            },
        );

        Ok(path)
    }

    pub async fn managed(&self) -> Vec<Repo> {
        self.managed.lock().await.values().cloned().collect()
    }

    /// Deletes clones whose ttl has expired. A clone that can't be removed
    /// from disk is still forgotten.
    pub async fn reap(&self) {
        let mut managed = self.managed.lock().await;

        let expired: Vec<String> = managed
            .iter()
            .filter(|(_, repo)| repo.last_cloned.elapsed() >= self.ttl)
            .map(|(sha, _)| sha.clone())
            .collect();

        for sha in expired {
            let repo = match managed.remove(&sha) {
                Some(repo) => repo,
                None => continue,
            };

            match tokio::fs::remove_dir_all(&repo.path).await {
                Ok(()) => tracing::info!(path = %repo.path.display(), "reaped repo"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %repo.path.display(), "reaped repo already removed")
                }
                Err(err) => {
                    tracing::warn!(path = %repo.path.display(), "unable to remove repo: {}", err)
                }
            }
        }
    }

    /// Reaps expired clones every `interval` until cancelled.
    pub async fn reaper(&self, cancel: CancellationToken, interval: Duration) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.reap().await,
            }
        }
    }
}
