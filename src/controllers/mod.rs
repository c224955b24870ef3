pub mod pods;
pub mod queue;
pub mod run;
pub mod workspace;
mod workspace_resources;

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};

pub use run::RunReconciler;
pub use workspace::WorkspaceReconciler;

/// Adds a non-controller owner reference to `owner` unless one is already
/// present. Returns whether `object` changed.
pub fn ensure_owner<O, K>(object: &mut K, owner: &O) -> anyhow::Result<bool>
where
    O: Resource<DynamicType = ()>,
    K: Resource,
{
    let owner_ref = match owner.owner_ref(&()) {
        Some(owner_ref) => owner_ref,
        None => {
            return Err(anyhow::anyhow!(
                "{} {} has no uid",
                O::kind(&()),
                owner.name_any()
            ))
        }
    };

    if object
        .owner_references()
        .iter()
        .any(|existing| existing.uid == owner_ref.uid)
    {
        return Ok(false);
    }

    object.owner_references_mut().push(owner_ref);

    Ok(true)
}

/// Time left before `since + timeout`, or `None` once it has passed.
pub fn remaining(since: &Time, timeout: Duration) -> Option<Duration> {
    let elapsed = (Utc::now() - since.0).to_std().unwrap_or(Duration::ZERO);

    timeout.checked_sub(elapsed).filter(|left| !left.is_zero())
}
