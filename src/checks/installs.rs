use std::{collections::HashMap, path::Path, sync::Arc};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use octocrab::{models::AppId, Octocrab};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{
    async_client::{AsyncClient, Invokable},
    client::{GithubApi, InstallApi},
    repo_manager::TokenProvider,
};

/// Builds API clients scoped to a single app install.
pub trait ApiFactory: Send + Sync {
    fn api(&self, install_id: i64) -> anyhow::Result<Arc<dyn GithubApi>>;
}

/// Queues work against the GitHub API on behalf of an install.
#[async_trait]
pub trait TaskSender: Send + Sync {
    async fn send(&self, install_id: i64, task: Arc<dyn Invokable>) -> anyhow::Result<()>;
}

#[derive(Serialize)]
struct ProbeClaims {
    iss: u64,
    iat: i64,
    exp: i64,
}

/// Creates install clients from the app's credentials.
pub struct AppApiFactory {
    app: Octocrab,
}

impl AppApiFactory {
    pub fn new(app_id: u64, key_path: &Path) -> anyhow::Result<Self> {
        if app_id == 0 {
            return Err(anyhow::anyhow!("github app id is required"));
        }

        let pem = std::fs::read(key_path).map_err(|err| {
            anyhow::anyhow!("unable to read app key {}: {}", key_path.display(), err)
        })?;
        let key = EncodingKey::from_rsa_pem(&pem)?;

        // decoding alone accepts keys that cannot sign
        let now = chrono::Utc::now().timestamp();
        let probe = ProbeClaims {
            iss: app_id,
            iat: now,
            exp: now + 60,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &probe, &key)
            .map_err(|err| anyhow::anyhow!("invalid app key {}: {}", key_path.display(), err))?;

        let app = Octocrab::builder().app(AppId(app_id), key).build()?;

        Ok(Self { app })
    }
}

impl ApiFactory for AppApiFactory {
    fn api(&self, install_id: i64) -> anyhow::Result<Arc<dyn GithubApi>> {
        Ok(Arc::new(InstallApi::new(&self.app, install_id)?))
    }
}

struct InstallClient {
    api: Arc<dyn GithubApi>,
    queue: AsyncClient,
}

/// Maintains one client per app install, created on first use.
pub struct InstallsManager {
    factory: Box<dyn ApiFactory>,
    cancel: CancellationToken,
    clients: Mutex<HashMap<i64, Arc<InstallClient>>>,
}

impl InstallsManager {
    pub fn new(app_id: u64, key_path: &Path, cancel: CancellationToken) -> anyhow::Result<Self> {
        Ok(Self::with_factory(
            Box::new(AppApiFactory::new(app_id, key_path)?),
            cancel,
        ))
    }

    pub fn with_factory(factory: Box<dyn ApiFactory>, cancel: CancellationToken) -> Self {
        Self {
            factory,
            cancel,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, install_id: i64) -> anyhow::Result<Arc<InstallClient>> {
        let mut clients = self.clients.lock().await;

        if let Some(client) = clients.get(&install_id) {
            return Ok(Arc::clone(client));
        }

        let api = self.factory.api(install_id)?;
        let client = Arc::new(InstallClient {
            queue: AsyncClient::spawn(Arc::clone(&api), self.cancel.child_token()),
            api,
        });
        clients.insert(install_id, Arc::clone(&client));

        tracing::info!(install_id, "created github install client");

        Ok(client)
    }

    pub async fn refresh_token(&self, install_id: i64) -> anyhow::Result<String> {
        self.client(install_id).await?.api.refresh_token().await
    }
}

#[async_trait]
impl TaskSender for InstallsManager {
    async fn send(&self, install_id: i64, task: Arc<dyn Invokable>) -> anyhow::Result<()> {
        self.client(install_id).await?.queue.send(task).await
    }
}

#[async_trait]
impl TokenProvider for InstallsManager {
    async fn token(&self, install_id: i64) -> anyhow::Result<String> {
        self.refresh_token(install_id).await
    }
}

#[cfg(test)]
mod tests {
    use crate::checks::fakes::{FakeApiFactory, FakeGithubApi};

    use super::*;

    #[test]
    fn test_app_id_required() {
        let result = AppApiFactory::new(0, Path::new("/nonexistent/key.pem"));

        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_key() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let key_path = dir.path().join("key.pem");
        std::fs::write(&key_path, "not a key")?;

        assert!(AppApiFactory::new(123, &key_path).is_err());
        assert!(AppApiFactory::new(123, &dir.path().join("missing.pem")).is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_clients_created_once_per_install() -> anyhow::Result<()> {
        let api = Arc::new(FakeGithubApi::default());
        let factory = FakeApiFactory::new(Arc::clone(&api));
        let manager = InstallsManager::with_factory(Box::new(factory.clone()), CancellationToken::new());

        assert_eq!(manager.refresh_token(1).await?, "token-1");
        assert_eq!(manager.token(1).await?, "token-1");
        assert_eq!(manager.refresh_token(2).await?, "token-2");

        assert_eq!(factory.installs(), vec![1, 2]);

        Ok(())
    }
}
