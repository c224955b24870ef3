use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const COMPLETE_CONDITION: &str = "Complete";
pub const FAILED_CONDITION: &str = "Failed";
pub const CREATE_REQUESTED_CONDITION: &str = "CreateRequested";

pub const UNQUEUED_REASON: &str = "Unqueued";
pub const QUEUED_REASON: &str = "Queued";
pub const POD_CREATED_REASON: &str = "PodCreated";
pub const POD_PENDING_REASON: &str = "PodPending";
pub const POD_RUNNING_REASON: &str = "PodRunning";
pub const POD_SUCCEEDED_REASON: &str = "PodSucceeded";
pub const POD_FAILED_REASON: &str = "PodFailed";
pub const POD_UNKNOWN_REASON: &str = "PodUnknown";
pub const ENQUEUE_TIMEOUT_REASON: &str = "EnqueueTimeout";
pub const QUEUE_TIMEOUT_REASON: &str = "QueueTimeout";
pub const POD_PENDING_TIMEOUT_REASON: &str = "PodPendingTimeout";
pub const WORKSPACE_NOT_FOUND_REASON: &str = "WorkspaceNotFound";
pub const CHECK_RUN_REQUESTED_REASON: &str = "CreateRequested";

pub fn find<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|condition| condition.type_ == type_)
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_)
        .map(|condition| condition.status == "True")
        .unwrap_or(false)
}

pub fn is_false(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_)
        .map(|condition| condition.status == "False")
        .unwrap_or(false)
}

/// Sets a condition, adding it if absent. The transition time only moves
/// when the status changes.
pub fn set(conditions: &mut Vec<Condition>, type_: &str, status: bool, reason: &str, message: &str) {
    let status = if status { "True" } else { "False" }.to_string();

    match conditions.iter_mut().find(|condition| condition.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Time(Utc::now());
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
        }
        None => conditions.push(Condition {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Time(Utc::now()),
            observed_generation: None,
        }),
    }
}
