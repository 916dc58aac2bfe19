//! cmsforge - scaffold a starter CMS and provision it end to end
//!
//! One `cmsforge new <name>` run generates a project locally, then creates a
//! cloud project with a Postgres database, a remote repository, a deploy
//! service and a CI pipeline, waiting for each to become ready. When a step
//! fails, every remote resource created so far is deleted again, newest first.
//!
//! ```bash
//! cmsforge new acme-site --owner acme
//! cmsforge config --json
//! cmsforge probe https://acme-site.up.railway.app/health --attempts 5
//! ```
//!
//! The workspace is split by concern:
//!
//! - `cmsforge-engine`: orchestrator, readiness poller, progress reporter,
//!   resource tracker and rollback
//! - `cmsforge-provision-api`: the collaborator traits the engine drives
//! - `cmsforge-clients`: Railway, GitHub and HTTP probe implementations
//! - `cmsforge-runner`: streaming subprocess execution
//! - `cmsforge-scaffold`: starter project templates
//! - `cmsforge-config`: configuration discovery and credentials
//! - `cmsforge-utils`: errors, exit codes, logging and redaction

pub mod cli;
pub mod display;

pub use cmsforge_config::{CliArgs, Config, ConfigSource, ProvisionConfig};
pub use cmsforge_engine::{
    OrchestrationOutcome, Orchestrator, PollPolicy, ProgressReporter, StepStatus, Timeline,
};
pub use cmsforge_utils::{CmsForgeError, ExitCode, UserFriendlyError};
