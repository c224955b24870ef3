use kube::ResourceExt;

use etok_core::{Run, RunPhase, Workspace};

/// Computes a workspace's queue from its runs: the first entry is the active
/// run, the rest wait behind it.
///
/// Runs already queued keep their relative order at the front; newly eligible
/// runs follow in the order given. A privileged run needs approval to join the
/// queue but does not lose its place if the approval is later withdrawn.
pub fn update_queue(workspace: &Workspace, runs: &[Run]) -> (Option<String>, Vec<String>) {
    let old = workspace.combined_queue();
    let workspace_name = workspace.name_any();

    let mut new: Vec<String> = runs
        .iter()
        .filter(|run| run.spec.workspace == workspace_name)
        .filter(|run| !run.is_done() && run.phase() != RunPhase::Completed)
        .filter(|run| run.spec.command.is_queueable())
        .filter(|run| {
            let name = run.name_any();
            !workspace.is_privileged(run.spec.command.as_str())
                || workspace.is_approved(&name)
                || old.contains(&name)
        })
        .map(|run| run.name_any())
        .collect();

    for name in old.iter().rev() {
        if let Some(position) = new.iter().position(|candidate| candidate == name) {
            let entry = new.remove(position);
            new.insert(0, entry);
        }
    }

    if new.is_empty() {
        return (None, Vec::new());
    }

    let queue = new.split_off(1);
    (new.pop(), queue)
}
