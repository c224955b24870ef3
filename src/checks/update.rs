use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::ResourceExt;
use lazy_static::lazy_static;
use regex::bytes::Regex;

use etok_core::{
    conditions::{self, COMPLETE_CONDITION, FAILED_CONDITION},
    CheckRun, CheckRunCommand, CheckSuiteSpec, Run,
};

use super::{
    async_client::Invokable,
    client::{CheckRunAction, CheckRunOptions, CheckRunOutput, GithubApi},
    plan::parse_plan_output,
};

/// GitHub rejects check run output fields larger than this.
pub const DEFAULT_MAX_FIELD_SIZE: usize = 65535;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_COMPLETED: &str = "completed";

pub const CONCLUSION_SUCCESS: &str = "success";
pub const CONCLUSION_FAILURE: &str = "failure";
pub const CONCLUSION_TIMED_OUT: &str = "timed_out";

const TEXT_START: &str = "```text\n";
const TEXT_END: &str = "\n```\n";

lazy_static! {
    static ref REFRESHING: Regex =
        Regex::new(r"(?m)[\n\r]+^.*: Refreshing state\.\.\. .*$").expect("valid regex");
}

/// A snapshot of a check run and its current run, rendered as a create or
/// update request for GitHub.
pub struct CheckRunUpdate {
    check_run: CheckRun,
    suite: CheckSuiteSpec,
    run: Option<Run>,
    logs: Arc<Mutex<Vec<u8>>>,
    reconcile_error: Option<String>,
    max_field_size: usize,
    strip_refreshing: bool,
}

impl CheckRunUpdate {
    pub fn new(check_run: CheckRun, suite: CheckSuiteSpec, run: Option<Run>) -> Self {
        Self {
            check_run,
            suite,
            run,
            logs: Arc::new(Mutex::new(Vec::new())),
            reconcile_error: None,
            max_field_size: DEFAULT_MAX_FIELD_SIZE,
            strip_refreshing: false,
        }
    }

    pub fn with_logs(self, logs: Vec<u8>) -> Self {
        Self {
            logs: Arc::new(Mutex::new(logs)),
            ..self
        }
    }

    pub fn with_reconcile_error(self, error: &anyhow::Error) -> Self {
        Self {
            reconcile_error: Some(error.to_string()),
            ..self
        }
    }

    pub fn with_max_field_size(self, max_field_size: usize) -> Self {
        Self {
            max_field_size,
            ..self
        }
    }

    /// Drops terraform's "Refreshing state..." lines from the details.
    pub fn with_strip_refreshing(self, strip_refreshing: bool) -> Self {
        Self {
            strip_refreshing,
            ..self
        }
    }

    /// Buffer the run's logs are read from, shared with whatever is following them.
    pub fn logs(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.logs)
    }

    pub fn install_id(&self) -> i64 {
        self.suite.install_id
    }

    fn logs_snapshot(&self) -> Vec<u8> {
        match self.logs.lock() {
            Ok(logs) => logs.clone(),
            Err(_) => Vec::new(),
        }
    }

    fn run_conditions(&self) -> &[Condition] {
        self.run
            .as_ref()
            .map(|run| run.conditions())
            .unwrap_or(&[])
    }

    pub fn status(&self) -> &'static str {
        if self.run.is_none() {
            return STATUS_QUEUED;
        }

        let current = self.run_conditions();
        if conditions::is_true(current, FAILED_CONDITION)
            || conditions::is_true(current, COMPLETE_CONDITION)
        {
            return STATUS_COMPLETED;
        }

        match conditions::find(current, COMPLETE_CONDITION) {
            Some(complete)
                if complete.status == "False"
                    && (complete.reason == conditions::POD_PENDING_REASON
                        || complete.reason == conditions::POD_RUNNING_REASON) =>
            {
                STATUS_IN_PROGRESS
            }
            _ => STATUS_QUEUED,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status() == STATUS_COMPLETED
    }

    pub fn conclusion(&self) -> Option<&'static str> {
        if !self.is_completed() {
            return None;
        }

        let current = self.run_conditions();
        if let Some(failed) = conditions::find(current, FAILED_CONDITION) {
            if failed.status == "True" {
                return match failed.reason.as_str() {
                    conditions::ENQUEUE_TIMEOUT_REASON | conditions::QUEUE_TIMEOUT_REASON => {
                        Some(CONCLUSION_TIMED_OUT)
                    }
                    _ => Some(CONCLUSION_FAILURE),
                };
            }
        }

        match conditions::find(current, COMPLETE_CONDITION) {
            Some(complete) if complete.reason == conditions::POD_FAILED_REASON => {
                Some(CONCLUSION_FAILURE)
            }
            _ => Some(CONCLUSION_SUCCESS),
        }
    }

    pub fn name(&self) -> String {
        let prefix = format!(
            "{}/{} | ",
            self.check_run.namespace().unwrap_or_default(),
            self.check_run.spec.workspace
        );

        if !self.check_run.is_created() {
            return format!("{}planning", prefix);
        }

        let progress = match self.check_run.current_command() {
            CheckRunCommand::Plan if self.is_completed() => {
                let logs = self.logs_snapshot();
                match parse_plan_output(&String::from_utf8_lossy(&logs)) {
                    Ok(plan) => plan.summary(),
                    Err(_) => "plan failed".to_string(),
                }
            }
            CheckRunCommand::Plan => "planning".to_string(),
            CheckRunCommand::Apply if self.is_completed() => "applied".to_string(),
            CheckRunCommand::Apply => "applying".to_string(),
        };

        format!("{}{}", prefix, progress)
    }

    fn failure_message(&self) -> Option<&str> {
        conditions::find(self.run_conditions(), FAILED_CONDITION)
            .filter(|failed| failed.status == "True")
            .map(|failed| failed.message.as_str())
    }

    pub fn summary(&self) -> String {
        let run_name = self.check_run.run_name();

        if let Some(message) = self.failure_message() {
            return format!("{} failed: {}\n", run_name, message);
        }

        if let Some(err) = &self.reconcile_error {
            return format!("{} reconcile error: {}\n", self.check_run.name_any(), err);
        }

        format!(
            "Note: you can also view logs by running: \n```bash\nkubectl logs -n {} pods/{}\n```",
            self.check_run.namespace().unwrap_or_default(),
            run_name
        )
    }

    /// The run's logs, fenced and trimmed to fit GitHub's field limit.
    pub fn details(&self) -> Option<String> {
        if self.reconcile_error.is_some() || self.failure_message().is_some() {
            return None;
        }

        let mut out = self.logs_snapshot();
        if out.is_empty() {
            return None;
        }

        if self.strip_refreshing {
            out = REFRESHING.replace_all(&out, &b""[..]).into_owned();
        }

        Some(fence(&out, self.max_field_size))
    }

    pub fn actions(&self) -> Vec<CheckRunAction> {
        if !self.is_completed() {
            return Vec::new();
        }

        let mut actions = vec![CheckRunAction {
            label: "Plan".to_string(),
            description: "Re-run plan".to_string(),
            identifier: "plan".to_string(),
        }];

        if self.check_run.current_command() == CheckRunCommand::Plan {
            actions.push(CheckRunAction {
                label: "Apply".to_string(),
                description: "Apply plan".to_string(),
                identifier: "apply".to_string(),
            });
        }

        actions
    }

    pub fn options(&self) -> CheckRunOptions {
        CheckRunOptions {
            name: self.name(),
            head_sha: self.suite.sha.clone(),
            status: self.status().to_string(),
            conclusion: self.conclusion().map(str::to_string),
            output: CheckRunOutput {
                title: self.check_run.run_name(),
                summary: self.summary(),
                text: self.details(),
            },
            actions: self.actions(),
            external_id: self.check_run.external_id(),
        }
    }
}

/// Wraps `out` in a text fence no longer than `max` bytes, keeping the tail
/// of the output when it doesn't fit.
fn fence(out: &[u8], max: usize) -> String {
    let overhead = TEXT_START.len() + TEXT_END.len();

    if out.len() + overhead <= max {
        return format!(
            "{}{}{}",
            TEXT_START,
            String::from_utf8_lossy(out).trim(),
            TEXT_END
        );
    }

    let skipped = out.len() + overhead - max;
    let exceeded = format!(
        "--- exceeded limit of {} bytes; skipping first {} bytes ---\n",
        max, skipped
    );

    // resume at the start of a line
    let mut start = (skipped + exceeded.len()).min(out.len());
    if let Some(newline) = out[start..].iter().position(|byte| *byte == b'\n') {
        start += newline + 1;
    }

    format!(
        "{}{}{}{}",
        TEXT_START,
        exceeded,
        String::from_utf8_lossy(&out[start..]).trim_matches('\n'),
        TEXT_END
    )
}

#[async_trait]
impl Invokable for CheckRunUpdate {
    async fn invoke(&self, api: &dyn GithubApi) -> anyhow::Result<()> {
        let options = self.options();

        match self.check_run.github_id() {
            Some(id) => {
                api.update_check_run(&self.suite.owner, &self.suite.repo, id, &options)
                    .await?;
                tracing::debug!(id, status = %options.status, "updated check run");
            }
            None => {
                let id = api
                    .create_check_run(&self.suite.owner, &self.suite.repo, &options)
                    .await?;
                tracing::info!(id, external_id = %options.external_id, "created check run");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use etok_core::{
        test::{get_check_run_fixture, get_check_suite_fixture, get_run_fixture},
        CheckRunEventKind, Command,
    };

    use crate::checks::fakes::FakeGithubApi;

    use super::*;

    const PLAN_OUTPUT: &str = "\nrandom_id.test: Refreshing state... [id=abc]\n\nPlan: 1 to add, 0 to change, 0 to destroy.\n";

    fn created_check_run() -> CheckRun {
        let mut check_run = get_check_run_fixture("default", "12345-networks");
        check_run.record_event(CheckRunEventKind::Created { id: 99 });
        check_run
    }

    fn run_with(complete: Option<(bool, &str)>, failed: Option<(&str, &str)>) -> Run {
        let mut run = get_run_fixture("default", "12345-networks-0", "networks", Command::Sh);
        let current = &mut run.status_mut().conditions;
        if let Some((status, reason)) = complete {
            conditions::set(current, COMPLETE_CONDITION, status, reason, "");
        }
        if let Some((reason, message)) = failed {
            conditions::set(current, FAILED_CONDITION, true, reason, message);
        }
        run
    }

    fn update(check_run: CheckRun, run: Option<Run>) -> CheckRunUpdate {
        CheckRunUpdate::new(check_run, get_check_suite_fixture().spec, run)
    }

    #[test]
    fn test_queued_without_run() {
        let update = update(get_check_run_fixture("default", "12345-networks"), None);

        assert_eq!(update.status(), STATUS_QUEUED);
        assert_eq!(update.conclusion(), None);
        assert_eq!(update.name(), "default/networks | planning");
        assert!(update.actions().is_empty());
        assert_eq!(
            update.summary(),
            "Note: you can also view logs by running: \n```bash\nkubectl logs -n default pods/12345-networks-0\n```"
        );
    }

    #[test]
    fn test_in_progress() {
        let queued = run_with(Some((false, conditions::QUEUED_REASON)), None);
        assert_eq!(update(created_check_run(), Some(queued)).status(), STATUS_QUEUED);

        let running = run_with(Some((false, conditions::POD_RUNNING_REASON)), None);
        let in_progress = update(created_check_run(), Some(running));

        assert_eq!(in_progress.status(), STATUS_IN_PROGRESS);
        assert_eq!(in_progress.name(), "default/networks | planning");
    }

    #[test]
    fn test_completed_plan() {
        let run = run_with(Some((true, conditions::POD_SUCCEEDED_REASON)), None);
        let update =
            update(created_check_run(), Some(run)).with_logs(PLAN_OUTPUT.as_bytes().to_vec());

        assert_eq!(update.status(), STATUS_COMPLETED);
        assert_eq!(update.conclusion(), Some(CONCLUSION_SUCCESS));
        assert_eq!(update.name(), "default/networks | +1/~0/\u{2212}0");

        let identifiers: Vec<String> = update
            .actions()
            .into_iter()
            .map(|action| action.identifier)
            .collect();
        assert_eq!(identifiers, vec!["plan", "apply"]);

        assert_eq!(
            update.details().as_deref(),
            Some("```text\nrandom_id.test: Refreshing state... [id=abc]\n\nPlan: 1 to add, 0 to change, 0 to destroy.\n```\n")
        );
    }

    #[test]
    fn test_unparseable_plan() {
        let run = run_with(Some((true, conditions::POD_FAILED_REASON)), None);
        let update = update(created_check_run(), Some(run)).with_logs(b"Error: boom\n".to_vec());

        assert_eq!(update.conclusion(), Some(CONCLUSION_FAILURE));
        assert_eq!(update.name(), "default/networks | plan failed");
    }

    #[test]
    fn test_completed_apply() {
        let mut check_run = created_check_run();
        check_run.record_event(CheckRunEventKind::RequestedAction {
            action: "apply".to_string(),
        });
        let run = run_with(Some((true, conditions::POD_SUCCEEDED_REASON)), None);
        let update = update(check_run, Some(run));

        assert_eq!(update.name(), "default/networks | applied");
        assert_eq!(update.actions().len(), 1);
        assert_eq!(update.options().output.title, "12345-networks-1");
    }

    #[test]
    fn test_timed_out() {
        let failed = run_with(None, Some((conditions::POD_PENDING_TIMEOUT_REASON, "stuck")));
        assert_eq!(
            update(created_check_run(), Some(failed)).conclusion(),
            Some(CONCLUSION_FAILURE)
        );

        let run = run_with(None, Some((conditions::QUEUE_TIMEOUT_REASON, "queue timeout exceeded")));
        let timed_out = update(created_check_run(), Some(run)).with_logs(b"ignored".to_vec());

        assert_eq!(timed_out.status(), STATUS_COMPLETED);
        assert_eq!(timed_out.conclusion(), Some(CONCLUSION_TIMED_OUT));
        assert_eq!(timed_out.summary(), "12345-networks-0 failed: queue timeout exceeded\n");
        assert_eq!(timed_out.details(), None);
    }

    #[test]
    fn test_reconcile_error() {
        let update = update(get_check_run_fixture("default", "12345-networks"), None)
            .with_reconcile_error(&anyhow::anyhow!("max config size exceeded"));

        assert_eq!(
            update.summary(),
            "12345-networks reconcile error: max config size exceeded\n"
        );
        assert_eq!(update.details(), None);
    }

    #[test]
    fn test_strip_refreshing() {
        let run = run_with(Some((true, conditions::POD_SUCCEEDED_REASON)), None);
        let update = update(created_check_run(), Some(run))
            .with_logs(PLAN_OUTPUT.as_bytes().to_vec())
            .with_strip_refreshing(true);

        assert_eq!(
            update.details().as_deref(),
            Some("```text\nPlan: 1 to add, 0 to change, 0 to destroy.\n```\n")
        );
    }

    #[test]
    fn test_fence_keeps_tail() {
        let out = "line-1\nline-2\nline-3\nline-4\nline-5\n".repeat(10);
        let max = 120;

        let fenced = fence(out.as_bytes(), max);

        assert!(fenced.len() <= max, "{} > {}", fenced.len(), max);
        assert!(fenced.starts_with("```text\n--- exceeded limit of 120 bytes; skipping first 243 bytes ---\n"));
        assert!(fenced.ends_with("line-5\n```\n"));

        let body = &fenced["```text\n".len()..];
        let first_line = body.lines().nth(1).unwrap_or_default();
        assert!(first_line.starts_with("line-"));
    }

    #[test]
    fn test_fence_fits() {
        assert_eq!(fence(b"\n  hello\n\n", 100), "```text\nhello\n```\n");
    }

    #[tokio::test]
    async fn test_invoke_creates_then_updates() -> anyhow::Result<()> {
        let api = FakeGithubApi::default();

        update(get_check_run_fixture("default", "12345-networks"), None)
            .invoke(&api)
            .await?;
        update(created_check_run(), None).invoke(&api).await?;

        let created = api.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].external_id, "default/12345-networks");
        assert_eq!(created[0].head_sha, get_check_suite_fixture().spec.sha);

        let updated = api.updated();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].0, 99);

        Ok(())
    }
}
