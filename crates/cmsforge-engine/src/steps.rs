//! The fixed provisioning step list
//!
//! 1. create cloud project      7. create deploy service
//! 2. provision database        8. configure secrets
//! 3. generate project files    9. wait for deployment
//! 4. install dependencies     10. seed initial data
//! 5. create repository        11. run CI (unless skipped)
//! 6. push code

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

use cmsforge_config::ProvisionConfig;
use cmsforge_provision_api::{
    CI_WORKFLOW_FILE, CloudPlatform, PushRequest, ReadinessProbe, RepoRequest, ScaffoldContext,
    Scaffolder, ServiceSpec, SourceHost,
};
use cmsforge_runner::{CommandSpec, SubprocessRunner};

use crate::executor::{RunContext, StepError, StepIo, StepOutputs};
use crate::orchestrator::{ProvisionPlan, ProvisionStep};
use crate::poller::{PollPolicy, Readiness, await_ready_observed};
use crate::tracker::ResourceHandle;

/// Tolerance for clock skew between this machine and the CI provider
const CI_CLOCK_SKEW_SECS: i64 = 30;

const COMMIT_MESSAGE: &str = "Initial commit from cmsforge";

/// External collaborators the standard steps call
#[derive(Clone)]
pub struct Collaborators {
    pub cloud: Arc<dyn CloudPlatform>,
    pub source: Arc<dyn SourceHost>,
    pub scaffolder: Arc<dyn Scaffolder>,
    pub probe: Arc<dyn ReadinessProbe>,
    pub runner: Arc<dyn SubprocessRunner>,
}

/// The standard plan for `config`, including pre-flight tool checks.
#[must_use]
pub fn standard_plan(config: &ProvisionConfig, collaborators: &Collaborators) -> ProvisionPlan {
    let mut required_tools = vec!["git".to_string()];
    for command in [&config.install_command, &config.seed_command] {
        if let Some(program) = command.first()
            && !required_tools.contains(program)
        {
            required_tools.push(program.clone());
        }
    }

    ProvisionPlan {
        project_name: config.project_name.clone(),
        target_dir: config.target_dir.clone(),
        steps: standard_steps(Arc::new(config.clone()), collaborators),
        required_tools,
    }
}

#[must_use]
pub fn standard_steps(
    config: Arc<ProvisionConfig>,
    c: &Collaborators,
) -> Vec<Box<dyn ProvisionStep>> {
    let mut steps: Vec<Box<dyn ProvisionStep>> = vec![
        Box::new(CreateCloudProject {
            cloud: Arc::clone(&c.cloud),
        }),
        Box::new(ProvisionDatabase {
            cloud: Arc::clone(&c.cloud),
        }),
        Box::new(GenerateFiles {
            scaffolder: Arc::clone(&c.scaffolder),
            config: Arc::clone(&config),
        }),
        Box::new(RunCommand {
            label: "Install dependencies",
            argv: config.install_command.clone(),
            with_database_url: false,
            runner: Arc::clone(&c.runner),
        }),
        Box::new(CreateRepository {
            source: Arc::clone(&c.source),
            config: Arc::clone(&config),
        }),
        Box::new(PushCode {
            source: Arc::clone(&c.source),
            config: Arc::clone(&config),
        }),
        Box::new(CreateDeployService {
            cloud: Arc::clone(&c.cloud),
            config: Arc::clone(&config),
        }),
        Box::new(ConfigureSecrets {
            cloud: Arc::clone(&c.cloud),
            source: Arc::clone(&c.source),
        }),
        Box::new(WaitForDeployment {
            probe: Arc::clone(&c.probe),
            config: Arc::clone(&config),
        }),
        Box::new(RunCommand {
            label: "Seed initial data",
            argv: config.seed_command.clone(),
            with_database_url: true,
            runner: Arc::clone(&c.runner),
        }),
    ];

    if let Some(poll) = config.ci_poll {
        steps.push(Box::new(RunPipeline {
            source: Arc::clone(&c.source),
            policy: poll.into(),
            branch: config.branch.clone(),
        }));
    }
    steps
}

struct CreateCloudProject {
    cloud: Arc<dyn CloudPlatform>,
}

#[async_trait]
impl ProvisionStep for CreateCloudProject {
    fn label(&self) -> &str {
        "Create cloud project"
    }

    async fn execute(&self, ctx: &RunContext, io: &mut StepIo<'_>) -> Result<StepOutputs, StepError> {
        let project = self.cloud.create_project(&ctx.project_name).await?;
        io.record(ResourceHandle::cloud_project(&project));
        Ok(StepOutputs {
            cloud_project: Some(project),
            ..StepOutputs::none()
        })
    }
}

struct ProvisionDatabase {
    cloud: Arc<dyn CloudPlatform>,
}

#[async_trait]
impl ProvisionStep for ProvisionDatabase {
    fn label(&self) -> &str {
        "Provision database"
    }

    async fn execute(&self, ctx: &RunContext, io: &mut StepIo<'_>) -> Result<StepOutputs, StepError> {
        let database = self.cloud.provision_database(ctx.cloud_project()?).await?;
        io.emit_line(&format!("database service {}", database.service_id));
        Ok(StepOutputs {
            database: Some(database),
            ..StepOutputs::none()
        })
    }
}

struct GenerateFiles {
    scaffolder: Arc<dyn Scaffolder>,
    config: Arc<ProvisionConfig>,
}

#[async_trait]
impl ProvisionStep for GenerateFiles {
    fn label(&self) -> &str {
        "Generate project files"
    }

    async fn execute(&self, ctx: &RunContext, io: &mut StepIo<'_>) -> Result<StepOutputs, StepError> {
        let scaffolder = Arc::clone(&self.scaffolder);
        let target = ctx.target_dir.clone();
        let context = ScaffoldContext {
            project_name: ctx.project_name.clone(),
            schema: self.config.schema.clone(),
            health_path: self.config.health_path.clone(),
            branch: self.config.branch.clone(),
        };

        let files = tokio::task::spawn_blocking(move || scaffolder.generate(&target, &context))
            .await
            .map_err(|e| StepError::Failed(format!("scaffolder panicked: {e}")))??;

        for file in &files {
            let shown = file.strip_prefix(&ctx.target_dir).unwrap_or(file.as_path());
            io.emit_line(&format!("wrote {}", shown.display()));
        }
        Ok(StepOutputs {
            generated_files: files,
            ..StepOutputs::none()
        })
    }
}

/// Runs a configured command inside the generated project.
struct RunCommand {
    label: &'static str,
    argv: Vec<String>,
    with_database_url: bool,
    runner: Arc<dyn SubprocessRunner>,
}

#[async_trait]
impl ProvisionStep for RunCommand {
    fn label(&self) -> &str {
        self.label
    }

    async fn execute(&self, ctx: &RunContext, io: &mut StepIo<'_>) -> Result<StepOutputs, StepError> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| StepError::Failed(format!("no command configured for '{}'", self.label)))?;

        let mut cmd = CommandSpec::new(program).args(args).cwd(&ctx.target_dir);
        if self.with_database_url {
            cmd = cmd.env("DATABASE_URL", &ctx.database()?.connection_string);
        }

        self.runner
            .run_streaming(&cmd, &mut |line: &str| io.emit_line(line))
            .await?;
        Ok(StepOutputs::none())
    }
}

struct CreateRepository {
    source: Arc<dyn SourceHost>,
    config: Arc<ProvisionConfig>,
}

#[async_trait]
impl ProvisionStep for CreateRepository {
    fn label(&self) -> &str {
        "Create repository"
    }

    async fn execute(&self, ctx: &RunContext, io: &mut StepIo<'_>) -> Result<StepOutputs, StepError> {
        let request = RepoRequest {
            name: ctx.project_name.clone(),
            owner: self.config.repo_owner.clone(),
            private: !self.config.public_repo,
            description: format!("{} content API", ctx.project_name),
        };
        let repo = self.source.create_repo(&request).await?;
        io.record(ResourceHandle::remote_repo(&repo));
        io.emit_line(&repo.html_url);
        Ok(StepOutputs {
            repository: Some(repo),
            ..StepOutputs::none()
        })
    }
}

struct PushCode {
    source: Arc<dyn SourceHost>,
    config: Arc<ProvisionConfig>,
}

#[async_trait]
impl ProvisionStep for PushCode {
    fn label(&self) -> &str {
        "Push code"
    }

    async fn execute(&self, ctx: &RunContext, io: &mut StepIo<'_>) -> Result<StepOutputs, StepError> {
        let request = PushRequest {
            dir: ctx.target_dir.clone(),
            clone_url: ctx.repository()?.clone_url.clone(),
            branch: self.config.branch.clone(),
            commit_message: COMMIT_MESSAGE.to_string(),
        };
        self.source
            .push(&request, &mut |line: &str| io.emit_line(line))
            .await?;
        Ok(StepOutputs::none())
    }
}

struct CreateDeployService {
    cloud: Arc<dyn CloudPlatform>,
    config: Arc<ProvisionConfig>,
}

#[async_trait]
impl ProvisionStep for CreateDeployService {
    fn label(&self) -> &str {
        "Create deploy service"
    }

    async fn execute(&self, ctx: &RunContext, io: &mut StepIo<'_>) -> Result<StepOutputs, StepError> {
        let project = ctx.cloud_project()?;
        let spec = ServiceSpec {
            name: ctx.project_name.clone(),
            repo: ctx.repository()?.full_name(),
            branch: self.config.branch.clone(),
        };
        let service_id = self.cloud.create_service(project, &spec).await?;
        let public_url = self.cloud.get_public_domain(project, &service_id).await?;
        io.emit_line(&public_url);

        Ok(StepOutputs {
            service_id: Some(service_id),
            public_url: Some(public_url),
            ..StepOutputs::none()
        })
    }
}

struct ConfigureSecrets {
    cloud: Arc<dyn CloudPlatform>,
    source: Arc<dyn SourceHost>,
}

#[async_trait]
impl ProvisionStep for ConfigureSecrets {
    fn label(&self) -> &str {
        "Configure secrets"
    }

    async fn execute(&self, ctx: &RunContext, io: &mut StepIo<'_>) -> Result<StepOutputs, StepError> {
        let database_url = ctx.database()?.connection_string.clone();

        let variables = BTreeMap::from([
            ("DATABASE_URL".to_string(), database_url.clone()),
            ("NODE_ENV".to_string(), "production".to_string()),
        ]);
        self.cloud
            .set_variables(ctx.cloud_project()?, ctx.service_id()?, &variables)
            .await?;
        io.emit_line(&format!("{} service variables set", variables.len()));

        let secrets = BTreeMap::from([("DATABASE_URL".to_string(), database_url)]);
        self.source.set_secrets(ctx.repository()?, &secrets).await?;
        io.emit_line(&format!("{} repository secrets set", secrets.len()));

        Ok(StepOutputs::none())
    }
}

struct WaitForDeployment {
    probe: Arc<dyn ReadinessProbe>,
    config: Arc<ProvisionConfig>,
}

#[async_trait]
impl ProvisionStep for WaitForDeployment {
    fn label(&self) -> &str {
        "Wait for deployment"
    }

    async fn execute(&self, ctx: &RunContext, io: &mut StepIo<'_>) -> Result<StepOutputs, StepError> {
        let url = format!(
            "{}{}",
            ctx.public_url()?.trim_end_matches('/'),
            self.config.health_path
        );
        let policy = PollPolicy::from(self.config.service_poll);
        let probe = &self.probe;
        let url_ref = url.as_str();

        await_ready_observed(
            &policy,
            || async move {
                probe.check(url_ref).await.map(|ready| {
                    if ready {
                        Readiness::Ready(())
                    } else {
                        Readiness::Pending(Some("not responding yet".to_string()))
                    }
                })
            },
            |obs| {
                let status = if obs.ready {
                    "ready"
                } else {
                    obs.status.as_deref().unwrap_or("waiting")
                };
                io.emit_line(&format!("[{}/{}] {url_ref}: {status}", obs.attempt, obs.max_attempts));
            },
        )
        .await?;

        Ok(StepOutputs::none().with_value("health_url", url))
    }
}

struct RunPipeline {
    source: Arc<dyn SourceHost>,
    policy: PollPolicy,
    branch: String,
}

#[async_trait]
impl ProvisionStep for RunPipeline {
    fn label(&self) -> &str {
        "Run CI pipeline"
    }

    async fn execute(&self, ctx: &RunContext, io: &mut StepIo<'_>) -> Result<StepOutputs, StepError> {
        let repo = ctx.repository()?;
        let since = Utc::now() - chrono::Duration::seconds(CI_CLOCK_SKEW_SECS);
        self.source
            .dispatch_pipeline(repo, CI_WORKFLOW_FILE, &self.branch)
            .await?;
        io.emit_line(&format!("dispatched {CI_WORKFLOW_FILE} on {}", self.branch));

        let source = &self.source;
        let branch = self.branch.as_str();
        let run = await_ready_observed(
            &self.policy,
            || async move {
                let latest = source
                    .latest_pipeline_run(&repo.owner, &repo.name, branch, since)
                    .await?;
                Ok::<_, cmsforge_provision_api::ProviderError>(match latest {
                    Some(run) if run.is_complete() => Readiness::Ready(run),
                    Some(run) => Readiness::Pending(Some(run.describe())),
                    None => Readiness::Pending(Some("waiting for run to start".to_string())),
                })
            },
            |obs| {
                let status = obs.status.as_deref().unwrap_or("completed");
                io.emit_line(&format!("[{}/{}] {status}", obs.attempt, obs.max_attempts));
            },
        )
        .await?;

        if !run.succeeded() {
            return Err(StepError::Failed(format!(
                "CI run finished as {}; see {}",
                run.describe(),
                run.html_url
            )));
        }
        io.emit_line(&run.html_url);
        Ok(StepOutputs {
            pipeline_run: Some(run),
            ..StepOutputs::none()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{OrchestrationOutcome, Orchestrator};
    use crate::progress::StepStatus;
    use crate::testing::{FAKE_DATABASE_URL, Fakes, pipeline_run, provision_config};

    #[test]
    fn test_standard_step_list() {
        let fakes = Fakes::new();
        let temp = tempfile::tempdir().unwrap();
        let config = provision_config("acme-site", &temp.path().join("acme-site"), false);

        let plan = standard_plan(&config, &fakes.collaborators());
        assert_eq!(
            plan.labels(),
            [
                "Create cloud project",
                "Provision database",
                "Generate project files",
                "Install dependencies",
                "Create repository",
                "Push code",
                "Create deploy service",
                "Configure secrets",
                "Wait for deployment",
                "Seed initial data",
                "Run CI pipeline",
            ]
        );
        assert_eq!(plan.required_tools, ["git", "npm"]);

        let skipped = provision_config("acme-site", &temp.path().join("acme-site"), true);
        assert_eq!(standard_plan(&skipped, &fakes.collaborators()).steps.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outputs_flow_between_steps() {
        let fakes = Fakes::new();
        fakes.probe.set_not_ready_for(2);
        fakes.source.set_pipeline_runs(vec![
            None,
            Some(pipeline_run("in_progress", None)),
            Some(pipeline_run("completed", Some("success"))),
        ]);
        let temp = tempfile::tempdir().unwrap();
        let config = provision_config("acme-site", &temp.path().join("acme-site"), false);

        let mut plan = standard_plan(&config, &fakes.collaborators());
        plan.required_tools.clear();
        let orchestrator = Orchestrator::new(fakes.compensator());
        let outcome = orchestrator.run(&plan).await.unwrap();

        let OrchestrationOutcome::Succeeded(summary) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(summary.context.public_url.as_deref(), Some("https://acme-site.up.example.app"));
        assert_eq!(summary.context.pipeline_run.as_ref().map(|r| r.id), Some(42));
        assert_eq!(fakes.script.calls_to("probe.check").len(), 3);
        assert_eq!(
            fakes.script.calls_to("probe.check")[0],
            "probe.check https://acme-site.up.example.app/health"
        );
        assert!(fakes.script.calls_to("runner.run")[1].contains(FAKE_DATABASE_URL));
        assert_eq!(
            fakes.script.calls_to("source.dispatch_pipeline"),
            ["source.dispatch_pipeline acme/acme-site ci.yml main"]
        );
        let run_queries = fakes.script.calls_to("source.latest_pipeline_run");
        assert!(!run_queries.is_empty());
        assert!(run_queries.iter().all(|q| q == "source.latest_pipeline_run main"));
        assert_eq!(orchestrator.snapshot().count(StepStatus::Complete), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ci_run_fails_the_step() {
        let fakes = Fakes::new();
        fakes
            .source
            .set_pipeline_runs(vec![Some(pipeline_run("completed", Some("failure")))]);
        let temp = tempfile::tempdir().unwrap();
        let config = provision_config("acme-site", &temp.path().join("acme-site"), false);

        let mut plan = standard_plan(&config, &fakes.collaborators());
        plan.required_tools.clear();
        let outcome = Orchestrator::new(fakes.compensator())
            .run(&plan)
            .await
            .unwrap();

        let OrchestrationOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.failing_step, 11);
        assert!(failure.error.message().contains("completed (failure)"));
        assert_eq!(
            fakes.script.calls_to("source.delete_repo"),
            ["source.delete_repo acme/acme-site"]
        );
        assert_eq!(
            fakes.script.calls_to("cloud.delete_project"),
            ["cloud.delete_project proj-acme-site"]
        );
    }
}
