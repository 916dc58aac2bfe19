//! Progress timeline and its state machine
//!
//! Each step moves `pending → in_progress → complete | error` and never leaves a
//! terminal state. [`transition`] is pure; [`ProgressReporter`] owns the current
//! timeline and publishes every accepted snapshot on a watch channel so a
//! display can render it at its own cadence.

use std::fmt;
use thiserror::Error;
use tokio::sync::watch;

use cmsforge_utils::line_window::LIVE_WINDOW_LINES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepStatus {
    Pending,
    InProgress,
    Complete,
    Error,
}

impl StepStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub label: String,
    pub status: StepStatus,
    /// Set only when `status` is `Error`
    pub error: Option<String>,
    /// Most recent output lines, populated only while `InProgress`
    pub output_lines: Vec<String>,
}

impl Step {
    #[must_use]
    pub fn pending(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            status: StepStatus::Pending,
            error: None,
            output_lines: Vec::new(),
        }
    }
}

/// Ordered, fixed-length list of steps for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    steps: Vec<Step>,
}

impl Timeline {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: labels.into_iter().map(Step::pending).collect(),
        }
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the step currently running
    #[must_use]
    pub fn in_progress(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|step| step.status == StepStatus::InProgress)
    }

    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|step| step.status == status).count()
    }

    /// True once a step failed or every step completed
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.count(StepStatus::Error) > 0 || self.count(StepStatus::Complete) == self.len()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgressError {
    #[error("step {index} cannot move from {from} to {to}: {reason}")]
    IllegalTransition {
        index: usize,
        from: StepStatus,
        to: StepStatus,
        reason: &'static str,
    },

    #[error("step {index} does not exist (timeline has {len} steps)")]
    UnknownStep { index: usize, len: usize },
}

fn live_tail(lines: &[String]) -> Vec<String> {
    let skip = lines.len().saturating_sub(LIVE_WINDOW_LINES);
    lines[skip..].to_vec()
}

/// Compute the timeline after moving step `index` to `new_status`.
///
/// `InProgress → InProgress` replaces the step's output lines and nothing
/// else. `error` is required with `Error` and rejected with any other status.
pub fn transition(
    timeline: &Timeline,
    index: usize,
    new_status: StepStatus,
    error: Option<&str>,
    output_lines: Option<&[String]>,
) -> Result<Timeline, ProgressError> {
    let current = timeline.get(index).ok_or(ProgressError::UnknownStep {
        index,
        len: timeline.len(),
    })?;
    let illegal = |reason| ProgressError::IllegalTransition {
        index,
        from: current.status,
        to: new_status,
        reason,
    };

    if error.is_some() && new_status != StepStatus::Error {
        return Err(illegal("an error message is only allowed when failing a step"));
    }

    let mut next = timeline.clone();
    let step = &mut next.steps[index];
    match (current.status, new_status) {
        (StepStatus::Pending, StepStatus::InProgress) => {
            if timeline.in_progress().is_some() {
                return Err(illegal("another step is already in progress"));
            }
            step.status = StepStatus::InProgress;
            step.output_lines = output_lines.map(live_tail).unwrap_or_default();
        }
        (StepStatus::InProgress, StepStatus::InProgress) => {
            if let Some(lines) = output_lines {
                step.output_lines = live_tail(lines);
            }
        }
        (StepStatus::InProgress, StepStatus::Complete) => {
            step.status = StepStatus::Complete;
            step.output_lines.clear();
        }
        (StepStatus::InProgress, StepStatus::Error) => {
            let message = error
                .filter(|m| !m.trim().is_empty())
                .ok_or_else(|| illegal("a failed step needs an error message"))?;
            step.status = StepStatus::Error;
            step.error = Some(message.to_string());
            step.output_lines.clear();
        }
        (from, _) if from.is_terminal() => return Err(illegal("the step already finished")),
        _ => return Err(illegal("steps must start before they finish")),
    }
    Ok(next)
}

/// Owner of the live timeline.
///
/// Writers go through [`ProgressReporter::apply`]; readers hold a
/// `watch::Receiver` from [`ProgressReporter::subscribe`] and see every
/// accepted snapshot.
#[derive(Debug)]
pub struct ProgressReporter {
    sender: watch::Sender<Timeline>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(Timeline::default())
    }
}

impl ProgressReporter {
    #[must_use]
    pub fn new(timeline: Timeline) -> Self {
        let (sender, _) = watch::channel(timeline);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Timeline> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> Timeline {
        self.sender.borrow().clone()
    }

    /// Replace the whole timeline, e.g. at the start of a run.
    pub fn reset(&self, timeline: Timeline) {
        self.sender.send_replace(timeline);
    }

    /// Apply one transition and publish the result. Rejected transitions
    /// leave the timeline untouched and notify nobody.
    pub fn apply(
        &self,
        index: usize,
        new_status: StepStatus,
        error: Option<&str>,
        output_lines: Option<&[String]>,
    ) -> Result<(), ProgressError> {
        self.publish(|current| transition(current, index, new_status, error, output_lines))
    }

    fn publish(
        &self,
        step: impl FnOnce(&Timeline) -> Result<Timeline, ProgressError>,
    ) -> Result<(), ProgressError> {
        let mut outcome = Ok(());
        self.sender.send_if_modified(|current| {
            match step(current) {
                Ok(next) => {
                    *current = next;
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        outcome
    }

    pub fn start(&self, index: usize) -> Result<(), ProgressError> {
        self.apply(index, StepStatus::InProgress, None, None)
    }

    pub fn update_output(&self, index: usize, lines: &[String]) -> Result<(), ProgressError> {
        self.apply(index, StepStatus::InProgress, None, Some(lines))
    }

    pub fn complete(&self, index: usize) -> Result<(), ProgressError> {
        self.apply(index, StepStatus::Complete, None, None)
    }

    pub fn fail(&self, index: usize, message: &str) -> Result<(), ProgressError> {
        self.apply(index, StepStatus::Error, Some(message), None)
    }

    /// Complete `index` and start `index + 1` as one snapshot, so observers
    /// never see a running pipeline with no step in progress.
    pub fn advance(&self, index: usize) -> Result<(), ProgressError> {
        self.publish(|current| {
            let completed = transition(current, index, StepStatus::Complete, None, None)?;
            transition(&completed, index + 1, StepStatus::InProgress, None, None)
        })
    }
}
