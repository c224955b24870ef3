use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use kube::{runtime::controller::Action, Resource, ResourceExt};

const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// When a reconcile wants to be invoked again regardless of watch events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    Never,
    After(Duration),
}

impl Requeue {
    /// The earlier of two requeue requests.
    pub fn sooner(self, other: Requeue) -> Requeue {
        match (self, other) {
            (Requeue::Never, other) => other,
            (this, Requeue::Never) => this,
            (Requeue::After(a), Requeue::After(b)) => Requeue::After(a.min(b)),
        }
    }
}

impl From<Requeue> for Action {
    fn from(requeue: Requeue) -> Self {
        match requeue {
            Requeue::Never => Action::await_change(),
            Requeue::After(duration) => Action::requeue(duration),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Reconcile(#[from] anyhow::Error),
}

/// Reconciles one object, identified by namespace and name. A missing object
/// has been deleted and is not an error.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, namespace: &str, name: &str) -> anyhow::Result<Requeue>;
}

/// Adapts a `Reconciler` to the callback shape `kube::runtime::Controller` expects.
pub async fn reconcile<K, R>(object: Arc<K>, reconciler: Arc<R>) -> Result<Action, Error>
where
    K: Resource,
    R: Reconciler,
{
    let namespace = object.namespace().unwrap_or_default();
    let requeue = reconciler.reconcile(&namespace, &object.name_any()).await?;

    Ok(requeue.into())
}

pub fn error_policy<K, R>(object: Arc<K>, error: &Error, _reconciler: Arc<R>) -> Action
where
    K: Resource,
{
    tracing::warn!(name = %object.name_any(), "reconcile failed: {}", error);

    Action::requeue(ERROR_REQUEUE)
}

/// Drives a controller stream to completion, logging each outcome.
pub async fn drain<S, T, E>(controller: &str, stream: S)
where
    S: Stream<Item = Result<T, E>>,
    T: Debug,
    E: std::error::Error,
{
    stream
        .for_each(|result| async move {
            match result {
                Ok(reconciled) => tracing::debug!(controller, "reconciled {:?}", reconciled),
                Err(err) => tracing::warn!(controller, "reconcile error: {}", err),
            }
        })
        .await;

    tracing::info!(controller, "controller stopped");
}
