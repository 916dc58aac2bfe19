//! Provisioning orchestrator for cmsforge
//!
//! - [`progress`]: step timeline, its state machine and the watch-based reporter
//! - [`poller`]: retry-until-ready loop used for deployment and CI waits
//! - [`tracker`] / [`rollback`]: created-resource bookkeeping and best-effort cleanup
//! - [`executor`]: the per-step I/O handle, step outputs and step errors
//! - [`orchestrator`]: pre-flight checks and step sequencing
//! - [`steps`]: the fixed provisioning step list

pub mod executor;
pub mod orchestrator;
pub mod poller;
pub mod progress;
pub mod rollback;
pub mod steps;
pub mod tracker;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use executor::{RunContext, StepError, StepIo, StepOutputs};
pub use orchestrator::{
    OrchestrationOutcome, Orchestrator, ProvisionFailure, ProvisionPlan, ProvisionStep,
    ProvisionSummary, preflight,
};
pub use poller::{PollError, PollObservation, PollPolicy, Readiness, await_ready, await_ready_observed};
pub use progress::{ProgressError, ProgressReporter, Step, StepStatus, Timeline, transition};
pub use rollback::{
    CollaboratorCompensator, Compensator, RollbackAttempt, RollbackOutcome, RollbackReport,
    compensate,
};
pub use steps::{Collaborators, standard_plan, standard_steps};
pub use tracker::{ResourceHandle, ResourceKind, ResourceTracker};
