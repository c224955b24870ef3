use std::sync::Mutex;

use async_trait::async_trait;

pub const RUNNER_CONTAINER: &str = "runner";

/// Reads the logs of a run's runner container.
#[async_trait]
pub trait PodLogs: Send + Sync {
    /// Everything logged so far.
    async fn logs(&self, namespace: &str, pod: &str) -> anyhow::Result<Vec<u8>>;

    /// Appends logs to `sink` as they are written, returning once the
    /// container exits.
    async fn follow(&self, namespace: &str, pod: &str, sink: &Mutex<Vec<u8>>)
        -> anyhow::Result<()>;
}
