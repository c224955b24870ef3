use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::client::GithubApi;

/// A unit of work carried out against the GitHub API.
#[async_trait]
pub trait Invokable: Send + Sync {
    async fn invoke(&self, api: &dyn GithubApi) -> anyhow::Result<()>;
}

/// Serializes calls to the GitHub API for one install: tasks are invoked one
/// at a time, in the order they were sent. Failures are logged and dropped.
#[derive(Clone)]
pub struct AsyncClient {
    queue: mpsc::Sender<Arc<dyn Invokable>>,
}

impl AsyncClient {
    pub fn spawn(api: Arc<dyn GithubApi>, cancel: CancellationToken) -> Self {
        let (queue, mut tasks) = mpsc::channel::<Arc<dyn Invokable>>(1);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    task = tasks.recv() => match task {
                        Some(task) => {
                            if let Err(err) = task.invoke(api.as_ref()).await {
                                tracing::error!("github api call failed: {}", err);
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Self { queue }
    }

    pub async fn send(&self, task: Arc<dyn Invokable>) -> anyhow::Result<()> {
        self.queue
            .send(task)
            .await
            .map_err(|_| anyhow::anyhow!("github client has stopped"))
    }
}
