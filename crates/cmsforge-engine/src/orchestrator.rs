//! Sequencing of provisioning steps with rollback on failure
//!
//! Steps run strictly one after another. The first failing step marks itself
//! `error`, later steps stay `pending`, and every resource recorded so far is
//! compensated before the failure is returned. Generated local files are left
//! in place.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Instrument;

use cmsforge_config::validation::check_project_slug;
use cmsforge_utils::error::{PreflightError, ProvisionError};
use cmsforge_utils::logging::{
    log_step_complete, log_step_error, log_step_start, run_span, step_span,
};

use crate::executor::{RunContext, StepError, StepIo, StepOutputs};
use crate::progress::{ProgressError, ProgressReporter, Timeline};
use crate::rollback::{Compensator, RollbackReport, compensate};
use crate::tracker::{ResourceHandle, ResourceTracker};

/// One unit of the provisioning pipeline
#[async_trait]
pub trait ProvisionStep: Send + Sync {
    fn label(&self) -> &str;

    /// Run the step against the outputs of earlier steps.
    ///
    /// A step that creates an external resource must `io.record` it as soon
    /// as the create call returns, before doing anything else that can fail.
    async fn execute(&self, ctx: &RunContext, io: &mut StepIo<'_>)
    -> Result<StepOutputs, StepError>;
}

/// Everything one run needs
pub struct ProvisionPlan {
    pub project_name: String,
    pub target_dir: PathBuf,
    pub steps: Vec<Box<dyn ProvisionStep>>,
    /// Executables that must be on `PATH` before anything is created
    pub required_tools: Vec<String>,
}

impl ProvisionPlan {
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.label().to_string()).collect()
    }
}

/// Result of a run that got past pre-flight
#[derive(Debug)]
pub struct ProvisionSummary {
    pub context: RunContext,
    /// Resources created and kept
    pub resources: Vec<ResourceHandle>,
}

#[derive(Debug)]
pub struct ProvisionFailure {
    /// 1-based
    pub failing_step: usize,
    pub total_steps: usize,
    pub step_label: String,
    pub error: StepError,
    pub rollback: RollbackReport,
}

impl ProvisionFailure {
    /// Convert into the user-facing error, keeping the step error as the cause.
    #[must_use]
    pub fn into_error(self) -> ProvisionError {
        ProvisionError::StepFailed {
            step: self.failing_step,
            total: self.total_steps,
            label: self.step_label,
            message: self.error.message(),
            kind: self.error.kind(),
            rollback: self.rollback.to_summary(),
        }
    }
}

#[derive(Debug)]
pub enum OrchestrationOutcome {
    Succeeded(ProvisionSummary),
    Failed(ProvisionFailure),
}

impl OrchestrationOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// 1-based index of the failing step
    #[must_use]
    pub fn failing_step(&self) -> Option<usize> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(failure) => Some(failure.failing_step),
        }
    }
}

/// Drives a [`ProvisionPlan`] and publishes progress.
pub struct Orchestrator {
    reporter: ProgressReporter,
    compensator: Arc<dyn Compensator>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(compensator: Arc<dyn Compensator>) -> Self {
        Self {
            reporter: ProgressReporter::default(),
            compensator,
        }
    }

    /// Receive every timeline snapshot of subsequent runs.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Timeline> {
        self.reporter.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> Timeline {
        self.reporter.snapshot()
    }

    /// Run the plan to completion or to its first failing step.
    ///
    /// Pre-flight failures return `Err` before any step starts or any resource
    /// exists. Step failures are reported as [`OrchestrationOutcome::Failed`]
    /// after rollback.
    pub async fn run(&self, plan: &ProvisionPlan) -> Result<OrchestrationOutcome, PreflightError> {
        let span = run_span(&plan.project_name);
        self.run_inner(plan).instrument(span).await
    }

    async fn run_inner(&self, plan: &ProvisionPlan) -> Result<OrchestrationOutcome, PreflightError> {
        self.reporter.reset(Timeline::new(plan.labels()));
        preflight(plan)?;

        let run_started = Instant::now();
        let total = plan.steps.len();
        let mut ctx = RunContext::new(&plan.project_name, &plan.target_dir);
        let mut tracker = ResourceTracker::new();

        for (index, step) in plan.steps.iter().enumerate() {
            let number = index + 1;
            let label = step.label();
            if index == 0 {
                report(self.reporter.start(index));
            }
            log_step_start(number, label);

            let started = Instant::now();
            let result = {
                let mut io = StepIo::new(index, &self.reporter, &mut tracker);
                step.execute(&ctx, &mut io)
                    .instrument(step_span(number, label))
                    .await
            };

            match result {
                Ok(outputs) => {
                    ctx.merge(outputs);
                    if number < total {
                        report(self.reporter.advance(index));
                    } else {
                        report(self.reporter.complete(index));
                    }
                    log_step_complete(number, label, started.elapsed());
                }
                Err(error) => {
                    let message = error.message();
                    report(self.reporter.fail(index, &message));
                    log_step_error(number, label, &message, started.elapsed());

                    let rollback = compensate(&tracker, self.compensator.as_ref()).await;
                    return Ok(OrchestrationOutcome::Failed(ProvisionFailure {
                        failing_step: number,
                        total_steps: total,
                        step_label: label.to_string(),
                        error,
                        rollback,
                    }));
                }
            }
        }

        tracing::info!(
            steps = total,
            resources = tracker.len(),
            duration_secs = run_started.elapsed().as_secs(),
            "Provisioning complete"
        );
        Ok(OrchestrationOutcome::Succeeded(ProvisionSummary {
            context: ctx,
            resources: tracker.into_handles(),
        }))
    }
}

/// Progress bookkeeping never aborts a run.
fn report(result: Result<(), ProgressError>) {
    if let Err(e) = result {
        tracing::warn!(error = %e, "Progress update rejected");
    }
}

/// Local checks that must pass before anything is created.
pub fn preflight(plan: &ProvisionPlan) -> Result<(), PreflightError> {
    check_project_slug(&plan.project_name).map_err(|reason| PreflightError::InvalidProjectName {
        name: plan.project_name.clone(),
        reason: reason.to_string(),
    })?;

    if plan.target_dir.exists() {
        return Err(PreflightError::TargetExists {
            path: plan.target_dir.clone(),
        });
    }

    for tool in &plan.required_tools {
        if which::which(tool).is_err() {
            return Err(PreflightError::MissingTool { tool: tool.clone() });
        }
    }

    tracing::debug!(target_dir = %plan.target_dir.display(), "Pre-flight checks passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::StepStatus;
    use crate::tracker::ResourceKind;
    use cmsforge_provision_api::ProviderError;
    use std::sync::Mutex;

    struct Noop(&'static str);

    #[async_trait]
    impl ProvisionStep for Noop {
        fn label(&self) -> &str {
            self.0
        }

        async fn execute(
            &self,
            _ctx: &RunContext,
            io: &mut StepIo<'_>,
        ) -> Result<StepOutputs, StepError> {
            io.emit_line("working");
            Ok(StepOutputs::none().with_value(self.0, "done"))
        }
    }

    struct Creates(&'static str);

    #[async_trait]
    impl ProvisionStep for Creates {
        fn label(&self) -> &str {
            "create"
        }

        async fn execute(
            &self,
            _ctx: &RunContext,
            io: &mut StepIo<'_>,
        ) -> Result<StepOutputs, StepError> {
            io.record(ResourceHandle::new(ResourceKind::CloudProject, self.0, self.0));
            Ok(StepOutputs::none())
        }
    }

    struct Fails;

    #[async_trait]
    impl ProvisionStep for Fails {
        fn label(&self) -> &str {
            "fail"
        }

        async fn execute(
            &self,
            _ctx: &RunContext,
            _io: &mut StepIo<'_>,
        ) -> Result<StepOutputs, StepError> {
            Err(ProviderError::Outage("503 Service Unavailable".to_string()).into())
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl Compensator for Recording {
        async fn delete(&self, handle: &ResourceHandle) -> Result<(), ProviderError> {
            self.0.lock().unwrap().push(handle.id.clone());
            Ok(())
        }
    }

    fn plan(dir: &std::path::Path, steps: Vec<Box<dyn ProvisionStep>>) -> ProvisionPlan {
        ProvisionPlan {
            project_name: "acme-site".to_string(),
            target_dir: dir.join("acme-site"),
            steps,
            required_tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_failure_marks_step_and_rolls_back() {
        let temp = tempfile::tempdir().unwrap();
        let compensator = Arc::new(Recording::default());
        let orchestrator = Orchestrator::new(compensator.clone());

        let outcome = orchestrator
            .run(&plan(
                temp.path(),
                vec![
                    Box::new(Creates("proj-1")),
                    Box::new(Fails),
                    Box::new(Noop("never")),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(outcome.failing_step(), Some(2));
        let timeline = orchestrator.snapshot();
        let statuses: Vec<StepStatus> = timeline.steps().iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            [StepStatus::Complete, StepStatus::Error, StepStatus::Pending]
        );
        assert!(timeline.steps()[1].error.as_deref().unwrap().contains("503"));
        assert_eq!(*compensator.0.lock().unwrap(), ["proj-1"]);

        let OrchestrationOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        let error = failure.into_error();
        assert_eq!(error.rollback().deleted.len(), 1);
    }

    #[tokio::test]
    async fn test_success_keeps_resources() {
        let temp = tempfile::tempdir().unwrap();
        let compensator = Arc::new(Recording::default());
        let orchestrator = Orchestrator::new(compensator.clone());

        let outcome = orchestrator
            .run(&plan(
                temp.path(),
                vec![Box::new(Creates("proj-1")), Box::new(Noop("seed"))],
            ))
            .await
            .unwrap();

        let OrchestrationOutcome::Succeeded(summary) = outcome else {
            panic!("expected success");
        };
        assert_eq!(summary.resources.len(), 1);
        assert_eq!(summary.context.values["seed"], "done");
        assert!(compensator.0.lock().unwrap().is_empty());
        assert_eq!(orchestrator.snapshot().count(StepStatus::Complete), 2);
    }

    #[tokio::test]
    async fn test_invalid_name_fails_preflight() {
        let temp = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(Arc::new(Recording::default()));
        let mut plan = plan(temp.path(), vec![Box::new(Noop("a"))]);
        plan.project_name = "Acme Site".to_string();

        let err = orchestrator.run(&plan).await.unwrap_err();
        assert!(matches!(err, PreflightError::InvalidProjectName { .. }));
        assert_eq!(orchestrator.snapshot().count(StepStatus::Pending), 1);
    }

    #[tokio::test]
    async fn test_missing_tool_fails_preflight() {
        let temp = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(Arc::new(Recording::default()));
        let mut plan = plan(temp.path(), vec![Box::new(Noop("a"))]);
        plan.required_tools = vec!["cmsforge-definitely-not-installed".to_string()];

        let err = orchestrator.run(&plan).await.unwrap_err();
        assert!(matches!(err, PreflightError::MissingTool { .. }));
    }
}
