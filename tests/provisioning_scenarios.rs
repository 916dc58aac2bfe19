//! End-to-end provisioning runs against in-memory collaborators.
//!
//! Each scenario drives the real orchestrator and the standard step list;
//! only the network, `git`/`npm` and the template writer are faked.

use std::path::Path;
use std::sync::{Arc, Mutex};

use cmsforge::{CmsForgeError, ExitCode};
use cmsforge_engine::testing::{Fakes, provision_config};
use cmsforge_engine::{
    OrchestrationOutcome, Orchestrator, ProvisionFailure, ProvisionPlan, StepStatus, Timeline,
    standard_plan,
};
use cmsforge_provision_api::ProviderError;
use cmsforge_utils::error::PreflightError;

fn plan(fakes: &Fakes, target: &Path, skip_ci: bool) -> ProvisionPlan {
    let config = provision_config("acme-site", target, skip_ci);
    let mut plan = standard_plan(&config, &fakes.collaborators());
    // git and npm are faked; do not require them on PATH
    plan.required_tools.clear();
    plan
}

async fn run_to_failure(fakes: &Fakes, plan: &ProvisionPlan) -> (ProvisionFailure, Timeline) {
    let orchestrator = Orchestrator::new(fakes.compensator());
    let outcome = orchestrator.run(plan).await.unwrap();
    let OrchestrationOutcome::Failed(failure) = outcome else {
        panic!("expected the run to fail");
    };
    (failure, orchestrator.snapshot())
}

fn statuses(timeline: &Timeline) -> Vec<StepStatus> {
    timeline.steps().iter().map(|s| s.status).collect()
}

#[tokio::test(start_paused = true)]
async fn test_full_run_keeps_everything() {
    let fakes = Fakes::new();
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("acme-site");

    let orchestrator = Orchestrator::new(fakes.compensator());
    let outcome = orchestrator.run(&plan(&fakes, &target, false)).await.unwrap();

    assert!(outcome.is_success());
    assert!(orchestrator.snapshot().is_finished());
    assert_eq!(orchestrator.snapshot().count(StepStatus::Complete), 11);
    assert!(fakes.script.calls_to("cloud.delete_project").is_empty());
    assert!(fakes.script.calls_to("source.delete_repo").is_empty());
    assert!(target.join("README.md").exists());
}

#[tokio::test(start_paused = true)]
async fn test_service_failure_rolls_back_newest_first() {
    let fakes = Fakes::new();
    fakes.script.fail(
        "cloud.create_service",
        ProviderError::Outage("503 Service Unavailable".to_string()),
    );
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("acme-site");

    let (failure, timeline) = run_to_failure(&fakes, &plan(&fakes, &target, false)).await;

    assert_eq!(failure.failing_step, 7);
    assert_eq!(failure.step_label, "Create deploy service");
    let mut expected = vec![StepStatus::Complete; 6];
    expected.push(StepStatus::Error);
    expected.extend([StepStatus::Pending; 4]);
    assert_eq!(statuses(&timeline), expected);
    assert!(timeline.steps()[6].error.as_deref().unwrap().contains("503"));

    let deletes: Vec<String> = fakes
        .script
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("source.delete_repo") || c.starts_with("cloud.delete_project"))
        .collect();
    assert_eq!(
        deletes,
        [
            "source.delete_repo acme/acme-site",
            "cloud.delete_project proj-acme-site",
        ]
    );

    // Local files survive a rollback
    assert!(target.exists());

    let err = CmsForgeError::from(failure.into_error());
    assert_eq!(err.to_exit_code(), ExitCode::STEP_FAILED);
}

#[tokio::test(start_paused = true)]
async fn test_first_step_failure_has_nothing_to_roll_back() {
    let fakes = Fakes::new();
    fakes.script.fail(
        "cloud.create_project",
        ProviderError::Auth("invalid token".to_string()),
    );
    let temp = tempfile::tempdir().unwrap();

    let (failure, timeline) =
        run_to_failure(&fakes, &plan(&fakes, &temp.path().join("acme-site"), false)).await;

    assert_eq!(failure.failing_step, 1);
    assert!(failure.rollback.is_empty());
    assert_eq!(timeline.count(StepStatus::Pending), 10);
    assert!(fakes.script.calls_to("cloud.delete_project").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_install_failure_removes_only_the_cloud_project() {
    let fakes = Fakes::new();
    fakes.runner.fail_program("npm");
    let temp = tempfile::tempdir().unwrap();

    let (failure, timeline) =
        run_to_failure(&fakes, &plan(&fakes, &temp.path().join("acme-site"), false)).await;

    assert_eq!(failure.step_label, "Install dependencies");
    assert!(timeline.steps()[3].output_lines.is_empty());
    assert!(fakes.script.calls_to("source.create_repo").is_empty());
    assert_eq!(
        fakes.script.calls_to("cloud.delete_project"),
        ["cloud.delete_project proj-acme-site"]
    );
    let err = CmsForgeError::from(failure.into_error());
    assert_eq!(err.to_exit_code(), ExitCode::STEP_FAILED);
}

#[tokio::test(start_paused = true)]
async fn test_deployment_that_never_answers_times_out() {
    let fakes = Fakes::new();
    fakes.probe.set_not_ready_for(u32::MAX);
    let temp = tempfile::tempdir().unwrap();

    let (failure, _) =
        run_to_failure(&fakes, &plan(&fakes, &temp.path().join("acme-site"), true)).await;

    assert_eq!(failure.step_label, "Wait for deployment");
    assert_eq!(fakes.script.calls_to("probe.check").len(), 3);
    assert!(failure.rollback.is_clean());
    assert_eq!(failure.rollback.attempts.len(), 2);

    let err = CmsForgeError::from(failure.into_error());
    assert_eq!(err.to_exit_code(), ExitCode::TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn test_failed_compensation_is_reported_without_hiding_the_cause() {
    let fakes = Fakes::new();
    fakes.script.fail(
        "cloud.set_variables",
        ProviderError::InvalidResponse("variableCollectionUpsert rejected".to_string()),
    );
    fakes.script.fail(
        "source.delete_repo",
        ProviderError::Auth("token lacks delete_repo scope".to_string()),
    );
    let temp = tempfile::tempdir().unwrap();

    let (failure, _) =
        run_to_failure(&fakes, &plan(&fakes, &temp.path().join("acme-site"), false)).await;

    assert_eq!(failure.step_label, "Configure secrets");
    assert_eq!(failure.rollback.failures().count(), 1);
    // The project is still deleted after the repository delete failed
    assert_eq!(fakes.script.calls_to("cloud.delete_project").len(), 1);

    let message = CmsForgeError::from(failure.into_error()).display_for_user();
    assert!(message.contains("variableCollectionUpsert rejected"));
    assert!(message.contains("Delete manually: repository"));
}

#[tokio::test(start_paused = true)]
async fn test_existing_target_stops_before_any_remote_call() {
    let fakes = Fakes::new();
    let temp = tempfile::tempdir().unwrap();
    let target = temp.path().join("acme-site");
    std::fs::create_dir(&target).unwrap();
    std::fs::write(target.join("keep.txt"), "mine").unwrap();

    let orchestrator = Orchestrator::new(fakes.compensator());
    let err = orchestrator
        .run(&plan(&fakes, &target, false))
        .await
        .unwrap_err();

    assert!(matches!(err, PreflightError::TargetExists { .. }));
    assert!(fakes.script.calls().is_empty());
    assert_eq!(orchestrator.snapshot().count(StepStatus::Pending), 11);
    assert_eq!(std::fs::read_to_string(target.join("keep.txt")).unwrap(), "mine");
    assert_eq!(
        CmsForgeError::from(err).to_exit_code(),
        ExitCode::PREFLIGHT
    );
}

#[tokio::test(start_paused = true)]
async fn test_observers_never_see_two_steps_running() {
    let fakes = Fakes::new();
    fakes.probe.set_not_ready_for(1);
    let temp = tempfile::tempdir().unwrap();
    let plan = plan(&fakes, &temp.path().join("acme-site"), false);

    let orchestrator = Orchestrator::new(fakes.compensator());
    let mut updates = orchestrator.subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observer = {
        let seen = seen.clone();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let timeline = updates.borrow_and_update().clone();
                seen.lock().unwrap().push(timeline);
            }
        })
    };

    assert!(orchestrator.run(&plan).await.unwrap().is_success());
    drop(orchestrator);
    observer.await.unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    for timeline in seen.iter() {
        let started = timeline.count(StepStatus::Complete) > 0;
        if started && !timeline.is_finished() {
            assert_eq!(timeline.count(StepStatus::InProgress), 1);
        }
        assert!(timeline.count(StepStatus::InProgress) <= 1);
        assert!(timeline.steps().iter().all(|s| s.output_lines.len() <= 5));
    }
}
