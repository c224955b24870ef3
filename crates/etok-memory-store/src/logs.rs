use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use etok_core::PodLogs;

type LogMap = HashMap<(String, String), Vec<u8>>;

#[derive(Debug, Default)]
pub struct MemoryPodLogs {
    logs: Arc<Mutex<LogMap>>,
}

impl MemoryPodLogs {
    pub fn set(&self, namespace: &str, pod: &str, logs: &[u8]) -> anyhow::Result<()> {
        let mut locked_logs = self.get_logs_locked()?;

        locked_logs.insert((namespace.to_string(), pod.to_string()), logs.to_vec());

        Ok(())
    }

    fn get_logs_locked(&self) -> anyhow::Result<MutexGuard<LogMap>> {
        match self.logs.lock() {
            Ok(locked_logs) => Ok(locked_logs),
            Err(_) => Err(anyhow::anyhow!("failed to acquire lock")),
        }
    }
}

#[async_trait]
impl PodLogs for MemoryPodLogs {
    async fn logs(&self, namespace: &str, pod: &str) -> anyhow::Result<Vec<u8>> {
        let locked_logs = self.get_logs_locked()?;

        match locked_logs.get(&(namespace.to_string(), pod.to_string())) {
            Some(logs) => Ok(logs.clone()),
            None => Err(anyhow::anyhow!("pods \"{}\" not found", pod)),
        }
    }

    async fn follow(
        &self,
        namespace: &str,
        pod: &str,
        sink: &Mutex<Vec<u8>>,
    ) -> anyhow::Result<()> {
        let logs = self.logs(namespace, pod).await?;

        match sink.lock() {
            Ok(mut sink) => sink.extend_from_slice(&logs),
            Err(_) => return Err(anyhow::anyhow!("failed to acquire lock")),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logs_and_follow() {
        let pod_logs = MemoryPodLogs::default();
        pod_logs.set("default", "run-1", b"fake logs").unwrap();

        assert_eq!(pod_logs.logs("default", "run-1").await.unwrap(), b"fake logs");
        assert!(pod_logs.logs("default", "run-2").await.is_err());

        let sink = Mutex::new(b"prefix: ".to_vec());
        pod_logs.follow("default", "run-1", &sink).await.unwrap();
        assert_eq!(sink.lock().unwrap().as_slice(), b"prefix: fake logs");
    }
}
