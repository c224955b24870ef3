//! GitHub checks integration: webhook intake, repository clones, and check
//! runs that drive terraform runs and report back to GitHub.

pub mod async_client;
pub mod check_run;
pub mod check_suite;
pub mod client;
pub mod events;
pub mod fakes;
pub mod installs;
pub mod monitor;
pub mod plan;
pub mod repo_manager;
pub mod run_resources;
pub mod update;
pub mod webhook;

pub use check_run::{check_run_controller, CheckRunReconciler};
pub use check_suite::{check_suite_controller, CheckSuiteReconciler};
pub use events::{Event, EventHandler};
pub use installs::InstallsManager;
pub use repo_manager::{Git2Cloner, RepoManager};
pub use update::CheckRunUpdate;
pub use webhook::{serve, webhook_router, WebhookState};
