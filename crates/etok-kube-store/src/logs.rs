use std::sync::Mutex;

use async_trait::async_trait;
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{api::LogParams, Api, Client};

use etok_core::{logs::RUNNER_CONTAINER, PodLogs};

#[derive(Clone)]
pub struct KubePodLogs {
    client: Client,
}

impl KubePodLogs {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodLogs for KubePodLogs {
    #[tracing::instrument(name = "kube::logs", skip(self))]
    async fn logs(&self, namespace: &str, pod: &str) -> anyhow::Result<Vec<u8>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(RUNNER_CONTAINER.to_string()),
            ..LogParams::default()
        };

        Ok(pods.logs(pod, &params).await?.into_bytes())
    }

    #[tracing::instrument(name = "kube::follow", skip(self, sink))]
    async fn follow(
        &self,
        namespace: &str,
        pod: &str,
        sink: &Mutex<Vec<u8>>,
    ) -> anyhow::Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(RUNNER_CONTAINER.to_string()),
            follow: true,
            ..LogParams::default()
        };

        let mut lines = Box::pin(pods.log_stream(pod, &params).await?.lines());
        while let Some(line) = lines.try_next().await? {
            match sink.lock() {
                Ok(mut sink) => {
                    sink.extend_from_slice(line.as_bytes());
                    sink.push(b'\n');
                }
                Err(_) => return Err(anyhow::anyhow!("failed to acquire lock")),
            }
        }

        Ok(())
    }
}
