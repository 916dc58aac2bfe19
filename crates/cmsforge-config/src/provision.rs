use std::path::PathBuf;
use std::time::Duration;

use super::model::{
    DEFAULT_CI_ATTEMPTS, DEFAULT_CI_INITIAL_DELAY_SECS, DEFAULT_CI_INTERVAL_SECS,
    DEFAULT_SERVICE_ATTEMPTS, DEFAULT_SERVICE_INITIAL_DELAY_SECS, DEFAULT_SERVICE_INTERVAL_SECS,
};
use super::{Config, Credentials};

/// Attempt budget for one readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub interval: Duration,
    pub initial_delay: Duration,
}

/// Per-run inputs from the `new` command
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub project_name: String,
    /// Directory the project is generated into; defaults to `./<project_name>`
    pub target_dir: Option<PathBuf>,
    pub skip_ci: bool,
    /// Free-form description of the content schema handed to the scaffolder
    pub schema: Option<String>,
}

/// Fully resolved input of one provisioning run.
///
/// Built once at startup; the orchestrator never prompts or reads the
/// environment.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub project_name: String,
    pub target_dir: PathBuf,
    pub repo_owner: Option<String>,
    pub public_repo: bool,
    pub branch: String,
    pub health_path: String,
    pub install_command: Vec<String>,
    pub seed_command: Vec<String>,
    pub subprocess_timeout: Duration,
    pub service_poll: PollSettings,
    /// `None` when CI should not be triggered
    pub ci_poll: Option<PollSettings>,
    pub schema: Option<String>,
    pub credentials: Credentials,
}

impl Config {
    #[must_use]
    pub fn service_poll(&self) -> PollSettings {
        let p = &self.polling;
        PollSettings {
            max_attempts: p.service_attempts.unwrap_or(DEFAULT_SERVICE_ATTEMPTS),
            interval: Duration::from_secs(
                p.service_interval_secs
                    .unwrap_or(DEFAULT_SERVICE_INTERVAL_SECS),
            ),
            initial_delay: Duration::from_secs(
                p.service_initial_delay_secs
                    .unwrap_or(DEFAULT_SERVICE_INITIAL_DELAY_SECS),
            ),
        }
    }

    #[must_use]
    pub fn ci_poll(&self) -> PollSettings {
        let p = &self.polling;
        PollSettings {
            max_attempts: p.ci_attempts.unwrap_or(DEFAULT_CI_ATTEMPTS),
            interval: Duration::from_secs(p.ci_interval_secs.unwrap_or(DEFAULT_CI_INTERVAL_SECS)),
            initial_delay: Duration::from_secs(
                p.ci_initial_delay_secs
                    .unwrap_or(DEFAULT_CI_INITIAL_DELAY_SECS),
            ),
        }
    }

    /// Combine the effective configuration with per-run inputs and credentials.
    #[must_use]
    pub fn provision_config(
        &self,
        request: ProvisionRequest,
        credentials: Credentials,
    ) -> ProvisionConfig {
        let target_dir = request
            .target_dir
            .unwrap_or_else(|| PathBuf::from(&request.project_name));
        ProvisionConfig {
            target_dir,
            repo_owner: self.project.owner.clone(),
            public_repo: self.public_repo(),
            branch: self.branch().to_string(),
            health_path: self.health_path().to_string(),
            install_command: self.install_command(),
            seed_command: self.seed_command(),
            subprocess_timeout: Duration::from_secs(self.subprocess_timeout_secs()),
            service_poll: self.service_poll(),
            ci_poll: (!request.skip_ci).then(|| self.ci_poll()),
            schema: request.schema,
            project_name: request.project_name,
            credentials,
        }
    }
}
