//! In-memory stand-ins for git and GitHub.

use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use async_trait::async_trait;

use super::{
    async_client::Invokable,
    client::{CheckRunOptions, GithubApi},
    installs::{ApiFactory, TaskSender},
    repo_manager::{Cloner, TokenProvider},
};

fn locked<T>(mutex: &Mutex<T>) -> anyhow::Result<MutexGuard<'_, T>> {
    match mutex.lock() {
        Ok(guard) => Ok(guard),
        Err(_) => Err(anyhow::anyhow!("failed to acquire lock")),
    }
}

fn snapshot<T: Clone>(mutex: &Mutex<Vec<T>>) -> Vec<T> {
    locked(mutex).map(|guard| guard.clone()).unwrap_or_default()
}

/// Populates the clone directory with a small terraform repo.
#[derive(Default)]
pub struct FakeCloner {
    tokens: Mutex<Vec<String>>,
}

impl FakeCloner {
    pub fn clones(&self) -> usize {
        snapshot(&self.tokens).len()
    }

    pub fn last_token(&self) -> Option<String> {
        snapshot(&self.tokens).pop()
    }
}

impl Cloner for FakeCloner {
    fn clone_branch(
        &self,
        _url: &str,
        _branch: &str,
        token: &str,
        path: &Path,
    ) -> anyhow::Result<()> {
        fs::create_dir_all(path.join(".git"))?;
        fs::create_dir_all(path.join("networks"))?;
        fs::write(path.join("README.md"), "# etok-e2e\n")?;
        fs::write(
            path.join("networks/main.tf"),
            "resource \"random_id\" \"test\" {\n  byte_length = 2\n}\n",
        )?;

        locked(&self.tokens)?.push(token.to_string());

        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTokenProvider;

#[async_trait]
impl TokenProvider for FakeTokenProvider {
    async fn token(&self, install_id: i64) -> anyhow::Result<String> {
        Ok(format!("token-{}", install_id))
    }
}

/// Records check run requests and hands out sequential ids.
pub struct FakeGithubApi {
    created: Mutex<Vec<CheckRunOptions>>,
    updated: Mutex<Vec<(i64, CheckRunOptions)>>,
    fail_next_create: AtomicBool,
    next_id: AtomicI64,
}

impl Default for FakeGithubApi {
    fn default() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            updated: Mutex::new(Vec::new()),
            fail_next_create: AtomicBool::new(false),
            next_id: AtomicI64::new(1000),
        }
    }
}

impl FakeGithubApi {
    pub fn created(&self) -> Vec<CheckRunOptions> {
        snapshot(&self.created)
    }

    pub fn updated(&self) -> Vec<(i64, CheckRunOptions)> {
        snapshot(&self.updated)
    }

    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl GithubApi for FakeGithubApi {
    async fn create_check_run(
        &self,
        _owner: &str,
        _repo: &str,
        options: &CheckRunOptions,
    ) -> anyhow::Result<i64> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(anyhow::anyhow!("github is down"));
        }

        locked(&self.created)?.push(options.clone());

        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn update_check_run(
        &self,
        _owner: &str,
        _repo: &str,
        id: i64,
        options: &CheckRunOptions,
    ) -> anyhow::Result<()> {
        locked(&self.updated)?.push((id, options.clone()));

        Ok(())
    }

    async fn refresh_token(&self) -> anyhow::Result<String> {
        Ok("token".to_string())
    }
}

/// Shares one `FakeGithubApi` between installs, issuing per-install tokens.
struct InstallScoped {
    install_id: i64,
    api: Arc<FakeGithubApi>,
}

#[async_trait]
impl GithubApi for InstallScoped {
    async fn create_check_run(
        &self,
        owner: &str,
        repo: &str,
        options: &CheckRunOptions,
    ) -> anyhow::Result<i64> {
        self.api.create_check_run(owner, repo, options).await
    }

    async fn update_check_run(
        &self,
        owner: &str,
        repo: &str,
        id: i64,
        options: &CheckRunOptions,
    ) -> anyhow::Result<()> {
        self.api.update_check_run(owner, repo, id, options).await
    }

    async fn refresh_token(&self) -> anyhow::Result<String> {
        Ok(format!("token-{}", self.install_id))
    }
}

#[derive(Clone)]
pub struct FakeApiFactory {
    api: Arc<FakeGithubApi>,
    installs: Arc<Mutex<Vec<i64>>>,
}

impl FakeApiFactory {
    pub fn new(api: Arc<FakeGithubApi>) -> Self {
        Self {
            api,
            installs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Installs a client has been built for, in order.
    pub fn installs(&self) -> Vec<i64> {
        snapshot(&self.installs)
    }
}

impl ApiFactory for FakeApiFactory {
    fn api(&self, install_id: i64) -> anyhow::Result<Arc<dyn GithubApi>> {
        locked(&self.installs)?.push(install_id);

        Ok(Arc::new(InstallScoped {
            install_id,
            api: Arc::clone(&self.api),
        }))
    }
}

/// Invokes tasks as soon as they are sent.
pub struct FakeTaskSender {
    api: Arc<FakeGithubApi>,
}

impl FakeTaskSender {
    pub fn new(api: Arc<FakeGithubApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl TaskSender for FakeTaskSender {
    async fn send(&self, _install_id: i64, task: Arc<dyn Invokable>) -> anyhow::Result<()> {
        task.invoke(self.api.as_ref()).await
    }
}
