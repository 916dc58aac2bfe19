//! Retry-until-ready polling with a fixed attempt budget

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};

use cmsforge_config::PollSettings;

/// Attempt budget for one wait.
///
/// The first probe runs after `initial_delay`; later probes are spaced by
/// `interval`. There is no sleep after the last attempt, so a wait that never
/// succeeds takes `initial_delay + (max_attempts - 1) * interval` plus probe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub initial_delay: Duration,
}

impl PollPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            initial_delay,
        }
    }

    /// Waiting for a fresh deployment to answer HTTP
    #[must_use]
    pub const fn service_readiness() -> Self {
        Self::new(30, Duration::from_secs(10), Duration::from_secs(30))
    }

    /// Waiting for a CI run to reach a terminal status
    #[must_use]
    pub const fn ci_completion() -> Self {
        Self::new(90, Duration::from_secs(10), Duration::from_secs(5))
    }

    /// Worst-case sleeping time of a wait that never succeeds
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.initial_delay + self.interval * self.max_attempts.saturating_sub(1)
    }
}

impl From<PollSettings> for PollPolicy {
    fn from(settings: PollSettings) -> Self {
        Self::new(settings.max_attempts, settings.interval, settings.initial_delay)
    }
}

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<T> {
    Ready(T),
    /// Not ready yet, optionally with a status text to show the user
    Pending(Option<String>),
}

/// What the observer sees after every probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollObservation {
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
    pub ready: bool,
    pub status: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error(
        "not ready after {attempts} attempts ({}s elapsed){}",
        .elapsed.as_secs(),
        format_last_status(.last_status)
    )]
    Timeout {
        attempts: u32,
        elapsed: Duration,
        last_status: Option<String>,
    },
}

fn format_last_status(status: &Option<String>) -> String {
    match status {
        Some(status) => format!("; last status: {status}"),
        None => String::new(),
    }
}

/// Poll `probe` until it reports ready or the budget runs out.
pub async fn await_ready<T, E, F, Fut>(policy: &PollPolicy, probe: F) -> Result<T, PollError>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Readiness<T>, E>>,
{
    await_ready_observed(policy, probe, |_| {}).await
}

/// Like [`await_ready`], calling `on_poll` after every probe.
///
/// A probe error counts as not ready; it is logged at debug level and becomes
/// the status reported to the observer.
pub async fn await_ready_observed<T, E, F, Fut, O>(
    policy: &PollPolicy,
    mut probe: F,
    mut on_poll: O,
) -> Result<T, PollError>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Readiness<T>, E>>,
    O: FnMut(&PollObservation),
{
    let started = Instant::now();
    if !policy.initial_delay.is_zero() {
        sleep(policy.initial_delay).await;
    }

    let mut last_status = None;
    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            sleep(policy.interval).await;
        }

        let status = match probe().await {
            Ok(Readiness::Ready(value)) => {
                on_poll(&PollObservation {
                    attempt,
                    max_attempts: policy.max_attempts,
                    ready: true,
                    status: None,
                });
                tracing::debug!(attempt, "Probe reported ready");
                return Ok(value);
            }
            Ok(Readiness::Pending(status)) => status,
            Err(e) => {
                tracing::debug!(attempt, error = %e, "Probe failed; treating as not ready");
                Some(e.to_string())
            }
        };

        on_poll(&PollObservation {
            attempt,
            max_attempts: policy.max_attempts,
            ready: false,
            status: status.clone(),
        });
        if status.is_some() {
            last_status = status;
        }
    }

    let elapsed = started.elapsed();
    tracing::warn!(
        attempts = policy.max_attempts,
        elapsed_secs = elapsed.as_secs(),
        "Gave up waiting for readiness"
    );
    Err(PollError::Timeout {
        attempts: policy.max_attempts,
        elapsed,
        last_status,
    })
}
