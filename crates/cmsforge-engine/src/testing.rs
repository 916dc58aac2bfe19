//! In-memory collaborators for orchestrator tests
//!
//! Every fake writes to a shared [`Script`] call log, and individual
//! operations can be made to fail. Nothing touches the network; the fake
//! scaffolder writes into the real target directory so pre-flight and
//! "local files are kept" checks can be exercised.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cmsforge_config::{Credentials, PollSettings, ProvisionConfig, Secret};
use cmsforge_provision_api::{
    CloudPlatform, CloudProject, DatabaseInfo, OutputSink, PipelineRun, ProviderError,
    PushRequest, ReadinessProbe, RemoteRepo, RepoRequest, ScaffoldContext, ScaffoldError,
    Scaffolder, ServiceSpec, SourceHost,
};
use cmsforge_runner::process::LineSink;
use cmsforge_runner::{CommandSpec, SubprocessError, SubprocessRunner};

use crate::rollback::CollaboratorCompensator;
use crate::steps::Collaborators;

pub const FAKE_DATABASE_URL: &str = "postgresql://postgres:pw@db.internal:5432/railway";

/// Shared call log and failure table
#[derive(Clone, Default)]
pub struct Script {
    calls: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<HashMap<String, ProviderError>>>,
}

impl Script {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `op` (e.g. `"cloud.create_service"`) fail with `error`.
    pub fn fail(&self, op: &str, error: ProviderError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op.to_string(), error);
    }

    /// Every call so far, as `op` or `op detail`
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Calls whose op starts with `prefix`
    #[must_use]
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    fn enter(&self, op: &str, detail: &str) -> Result<(), ProviderError> {
        let entry = if detail.is_empty() {
            op.to_string()
        } else {
            format!("{op} {detail}")
        };
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        match self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op)
        {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

pub struct FakeCloud {
    script: Script,
}

#[async_trait]
impl CloudPlatform for FakeCloud {
    async fn create_project(&self, name: &str) -> Result<CloudProject, ProviderError> {
        self.script.enter("cloud.create_project", name)?;
        Ok(CloudProject {
            project_id: format!("proj-{name}"),
            environment_id: "env-production".to_string(),
            name: name.to_string(),
        })
    }

    async fn provision_database(
        &self,
        project: &CloudProject,
    ) -> Result<DatabaseInfo, ProviderError> {
        self.script
            .enter("cloud.provision_database", &project.project_id)?;
        Ok(DatabaseInfo {
            service_id: "svc-postgres".to_string(),
            connection_string: FAKE_DATABASE_URL.to_string(),
        })
    }

    async fn create_service(
        &self,
        project: &CloudProject,
        spec: &ServiceSpec,
    ) -> Result<String, ProviderError> {
        self.script
            .enter("cloud.create_service", &format!("{} {}", project.project_id, spec.repo))?;
        Ok("svc-app".to_string())
    }

    async fn set_variables(
        &self,
        _project: &CloudProject,
        service_id: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        let keys: Vec<&str> = variables.keys().map(String::as_str).collect();
        self.script
            .enter("cloud.set_variables", &format!("{service_id} {}", keys.join(",")))
    }

    async fn get_public_domain(
        &self,
        project: &CloudProject,
        _service_id: &str,
    ) -> Result<String, ProviderError> {
        self.script.enter("cloud.get_public_domain", "")?;
        Ok(format!("https://{}.up.example.app", project.name))
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), ProviderError> {
        self.script.enter("cloud.delete_project", project_id)
    }
}

pub struct FakeSource {
    script: Script,
    runs: Mutex<VecDeque<Option<PipelineRun>>>,
}

impl FakeSource {
    /// Script the answers of `latest_pipeline_run`; the last one repeats.
    pub fn set_pipeline_runs(&self, runs: Vec<Option<PipelineRun>>) {
        *self.runs.lock().unwrap_or_else(PoisonError::into_inner) = runs.into();
    }
}

#[must_use]
pub fn pipeline_run(status: &str, conclusion: Option<&str>) -> PipelineRun {
    PipelineRun {
        id: 42,
        status: status.to_string(),
        conclusion: conclusion.map(str::to_string),
        html_url: "https://github.example/acme/runs/42".to_string(),
    }
}

#[async_trait]
impl SourceHost for FakeSource {
    async fn create_repo(&self, request: &RepoRequest) -> Result<RemoteRepo, ProviderError> {
        self.script.enter("source.create_repo", &request.name)?;
        let owner = request.owner.clone().unwrap_or_else(|| "acme".to_string());
        Ok(RemoteRepo {
            clone_url: format!("https://github.example/{owner}/{}.git", request.name),
            html_url: format!("https://github.example/{owner}/{}", request.name),
            owner,
            name: request.name.clone(),
        })
    }

    async fn push(
        &self,
        request: &PushRequest,
        on_line: OutputSink<'_>,
    ) -> Result<(), ProviderError> {
        self.script.enter("source.push", &request.branch)?;
        on_line("Enumerating objects: 12, done.");
        on_line(&format!("To {}", request.clone_url));
        Ok(())
    }

    async fn set_secrets(
        &self,
        repo: &RemoteRepo,
        secrets: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        let keys: Vec<&str> = secrets.keys().map(String::as_str).collect();
        self.script
            .enter("source.set_secrets", &format!("{} {}", repo.full_name(), keys.join(",")))
    }

    async fn delete_repo(&self, owner: &str, name: &str) -> Result<(), ProviderError> {
        self.script
            .enter("source.delete_repo", &format!("{owner}/{name}"))
    }

    async fn dispatch_pipeline(
        &self,
        repo: &RemoteRepo,
        workflow: &str,
        branch: &str,
    ) -> Result<(), ProviderError> {
        self.script.enter(
            "source.dispatch_pipeline",
            &format!("{} {workflow} {branch}", repo.full_name()),
        )
    }

    async fn latest_pipeline_run(
        &self,
        _owner: &str,
        _name: &str,
        branch: &str,
        _since: DateTime<Utc>,
    ) -> Result<Option<PipelineRun>, ProviderError> {
        self.script.enter("source.latest_pipeline_run", branch)?;
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let next = if runs.len() > 1 {
            runs.pop_front().flatten()
        } else {
            runs.front().cloned().flatten()
        };
        Ok(next)
    }
}

/// Probe that reports not-ready for the first `not_ready_for` checks
pub struct FakeProbe {
    script: Script,
    not_ready_for: Mutex<u32>,
}

impl FakeProbe {
    pub fn set_not_ready_for(&self, checks: u32) {
        *self
            .not_ready_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = checks;
    }
}

#[async_trait]
impl ReadinessProbe for FakeProbe {
    async fn check(&self, url: &str) -> Result<bool, ProviderError> {
        self.script.enter("probe.check", url)?;
        let mut remaining = self
            .not_ready_for
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *remaining == 0 {
            return Ok(true);
        }
        *remaining -= 1;
        Ok(false)
    }
}

/// Runner that prints two lines per command and fails chosen programs
#[derive(Default)]
pub struct FakeRunner {
    script: Script,
    failing: Mutex<HashSet<String>>,
}

impl FakeRunner {
    pub fn fail_program(&self, program: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(program.to_string());
    }
}

#[async_trait]
impl SubprocessRunner for FakeRunner {
    async fn run_streaming(
        &self,
        cmd: &CommandSpec,
        on_line: LineSink<'_>,
    ) -> Result<(), SubprocessError> {
        let program = cmd.program_name();
        let database_url = cmd
            .env
            .get(std::ffi::OsStr::new("DATABASE_URL"))
            .map(|v| v.to_string_lossy().into_owned());
        let detail = match database_url {
            Some(url) => format!("{cmd} DATABASE_URL={url}"),
            None => cmd.to_string(),
        };
        let _ = self.script.enter("runner.run", &detail);

        on_line(&format!("> {cmd}"));
        on_line("ok");

        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&program);
        if failing {
            return Err(SubprocessError::ExitCode {
                command: cmd.to_string(),
                code: Some(1),
                tail: vec![format!("> {cmd}"), "npm ERR! code ELIFECYCLE".to_string()],
            });
        }
        Ok(())
    }
}

/// Creates the target directory with a single README
pub struct FakeScaffolder {
    script: Script,
}

impl Scaffolder for FakeScaffolder {
    fn generate(
        &self,
        target_dir: &Path,
        context: &ScaffoldContext,
    ) -> Result<Vec<PathBuf>, ScaffoldError> {
        self.script
            .enter("scaffold.generate", &context.project_name)
            .map_err(|e| ScaffoldError::Io {
                path: target_dir.to_path_buf(),
                source: std::io::Error::other(e.to_string()),
            })?;
        if target_dir.exists() {
            return Err(ScaffoldError::TargetExists(target_dir.to_path_buf()));
        }
        let readme = target_dir.join("README.md");
        let io_err = |source| ScaffoldError::Io {
            path: readme.clone(),
            source,
        };
        std::fs::create_dir_all(target_dir).map_err(io_err)?;
        std::fs::write(&readme, format!("# {}\n", context.project_name)).map_err(io_err)?;
        Ok(vec![readme])
    }
}

/// One set of fakes sharing a [`Script`]
pub struct Fakes {
    pub script: Script,
    pub cloud: Arc<FakeCloud>,
    pub source: Arc<FakeSource>,
    pub probe: Arc<FakeProbe>,
    pub runner: Arc<FakeRunner>,
    pub scaffolder: Arc<FakeScaffolder>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self::new()
    }
}

impl Fakes {
    #[must_use]
    pub fn new() -> Self {
        let script = Script::new();
        let source = FakeSource {
            script: script.clone(),
            runs: Mutex::new(VecDeque::from([Some(pipeline_run(
                "completed",
                Some("success"),
            ))])),
        };
        Self {
            cloud: Arc::new(FakeCloud {
                script: script.clone(),
            }),
            source: Arc::new(source),
            probe: Arc::new(FakeProbe {
                script: script.clone(),
                not_ready_for: Mutex::new(0),
            }),
            runner: Arc::new(FakeRunner {
                script: script.clone(),
                failing: Mutex::default(),
            }),
            scaffolder: Arc::new(FakeScaffolder {
                script: script.clone(),
            }),
            script,
        }
    }

    #[must_use]
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            cloud: self.cloud.clone(),
            source: self.source.clone(),
            scaffolder: self.scaffolder.clone(),
            probe: self.probe.clone(),
            runner: self.runner.clone(),
        }
    }

    #[must_use]
    pub fn compensator(&self) -> Arc<CollaboratorCompensator> {
        Arc::new(CollaboratorCompensator::new(
            self.cloud.clone(),
            self.source.clone(),
        ))
    }
}

/// A resolved configuration with short poll budgets and no initial delays.
#[must_use]
pub fn provision_config(project_name: &str, target_dir: &Path, skip_ci: bool) -> ProvisionConfig {
    let poll = PollSettings {
        max_attempts: 3,
        interval: Duration::from_secs(1),
        initial_delay: Duration::ZERO,
    };
    ProvisionConfig {
        project_name: project_name.to_string(),
        target_dir: target_dir.to_path_buf(),
        repo_owner: None,
        public_repo: false,
        branch: "main".to_string(),
        health_path: "/health".to_string(),
        install_command: vec!["npm".to_string(), "install".to_string()],
        seed_command: vec!["npm".to_string(), "run".to_string(), "seed".to_string()],
        subprocess_timeout: Duration::from_secs(60),
        service_poll: poll,
        ci_poll: (!skip_ci).then_some(poll),
        schema: None,
        credentials: Credentials {
            railway_token: Secret::new("rw-token"),
            github_token: Secret::new("gh-token"),
            sources: HashMap::new(),
        },
    }
}
