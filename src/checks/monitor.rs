use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use super::{async_client::Invokable, installs::TaskSender};

pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Long running work whose progress is periodically reported to GitHub.
#[async_trait]
pub trait Process: Invokable {
    async fn start(&self) -> anyhow::Result<()>;
}

/// Runs `process` to completion, sending it to GitHub every `interval` while
/// it runs and once more when it finishes.
pub async fn monitor<P>(
    sender: &dyn TaskSender,
    install_id: i64,
    process: Arc<P>,
    interval: Duration,
) -> anyhow::Result<()>
where
    P: Process + 'static,
{
    let mut started = {
        let process = Arc::clone(&process);
        tokio::spawn(async move { process.start().await })
    };

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    let result = loop {
        tokio::select! {
            biased;

            finished = &mut started => break finished.map_err(anyhow::Error::from).and_then(|result| result),
            _ = ticker.tick() => {
                // the process keeps running, a later tick or the final send catches up
                if let Err(err) = sender.send(install_id, Arc::clone(&process) as Arc<dyn Invokable>).await {
                    tracing::warn!(install_id, "unable to send progress: {}", err);
                }
            }
        }
    };

    sender.send(install_id, process).await?;

    result
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use crate::checks::client::GithubApi;

    use super::*;

    #[derive(Default)]
    struct Sleeper {
        finished: AtomicBool,
    }

    #[async_trait]
    impl Invokable for Sleeper {
        async fn invoke(&self, _api: &dyn GithubApi) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Process for Sleeper {
        async fn start(&self) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Records, for each send, whether the process had finished by then.
    #[derive(Default)]
    struct Recorder {
        process: Mutex<Option<Arc<Sleeper>>>,
        sends: Mutex<Vec<bool>>,
        fail_interim: bool,
    }

    #[async_trait]
    impl TaskSender for Recorder {
        async fn send(&self, _install_id: i64, _task: Arc<dyn Invokable>) -> anyhow::Result<()> {
            let finished = match self.process.lock() {
                Ok(process) => process
                    .as_ref()
                    .map(|process| process.finished.load(Ordering::SeqCst))
                    .unwrap_or(false),
                Err(_) => return Err(anyhow::anyhow!("failed to acquire lock")),
            };

            match self.sends.lock() {
                Ok(mut sends) => sends.push(finished),
                Err(_) => return Err(anyhow::anyhow!("failed to acquire lock")),
            }

            if self.fail_interim && !finished {
                return Err(anyhow::anyhow!("github is down"));
            }

            Ok(())
        }
    }

    #[tokio::test]
    async fn test_monitor() -> anyhow::Result<()> {
        let process = Arc::new(Sleeper::default());
        let recorder = Recorder::default();
        *recorder.process.lock().unwrap() = Some(Arc::clone(&process));

        monitor(&recorder, 1, process, Duration::from_millis(1)).await?;

        let sends = recorder.sends.lock().unwrap().clone();
        let interim = sends.iter().filter(|finished| !**finished).count();
        let last = sends.iter().filter(|finished| **finished).count();
        assert!(interim >= 3, "expected at least 3 interim sends, got {:?}", sends);
        assert_eq!(last, 1, "expected one final send, got {:?}", sends);
        assert_eq!(sends.last(), Some(&true));

        Ok(())
    }

    #[tokio::test]
    async fn test_monitor_survives_failed_sends() -> anyhow::Result<()> {
        let process = Arc::new(Sleeper::default());
        let recorder = Recorder {
            fail_interim: true,
            ..Recorder::default()
        };
        *recorder.process.lock().unwrap() = Some(Arc::clone(&process));

        monitor(&recorder, 1, Arc::clone(&process), Duration::from_millis(1)).await?;

        assert!(process.finished.load(Ordering::SeqCst));
        let sends = recorder.sends.lock().unwrap().clone();
        assert!(sends.len() >= 2, "expected interim and final sends, got {:?}", sends);
        assert_eq!(sends.last(), Some(&true));

        Ok(())
    }

    struct Failing;

    #[async_trait]
    impl Invokable for Failing {
        async fn invoke(&self, _api: &dyn GithubApi) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Process for Failing {
        async fn start(&self) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("stream closed"))
        }
    }

    #[tokio::test]
    async fn test_monitor_reports_failed_process() {
        let recorder = Recorder::default();

        let result = monitor(&recorder, 1, Arc::new(Failing), Duration::from_secs(10)).await;

        assert!(result.is_err());
        assert_eq!(recorder.sends.lock().unwrap().len(), 1);
    }
}
