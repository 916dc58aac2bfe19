//! Best-effort compensation of created resources
//!
//! After a failed step every recorded resource is deleted, most recent first.
//! A failing delete is logged and recorded but never stops the remaining ones,
//! and nothing here is surfaced in place of the step error that caused the
//! rollback. Resources this pass cannot remove are left to the platform's own
//! cleanup.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use cmsforge_provision_api::{CloudPlatform, ProviderError, SourceHost};
use cmsforge_utils::error::RollbackSummary;
use cmsforge_utils::redaction::redact_message;

use crate::tracker::{ResourceHandle, ResourceKind, ResourceTracker};

/// Upper bound for a single compensating delete
const DELETE_TIMEOUT: Duration = Duration::from_secs(60);

/// Deletes one tracked resource
#[async_trait]
pub trait Compensator: Send + Sync {
    async fn delete(&self, handle: &ResourceHandle) -> Result<(), ProviderError>;
}

/// Routes deletes to the collaborator that created the resource
pub struct CollaboratorCompensator {
    cloud: Arc<dyn CloudPlatform>,
    source: Arc<dyn SourceHost>,
}

impl CollaboratorCompensator {
    #[must_use]
    pub fn new(cloud: Arc<dyn CloudPlatform>, source: Arc<dyn SourceHost>) -> Self {
        Self { cloud, source }
    }
}

#[async_trait]
impl Compensator for CollaboratorCompensator {
    async fn delete(&self, handle: &ResourceHandle) -> Result<(), ProviderError> {
        match handle.kind {
            ResourceKind::CloudProject => self.cloud.delete_project(&handle.id).await,
            ResourceKind::RemoteRepo => {
                let (owner, name) = handle.id.split_once('/').ok_or_else(|| {
                    ProviderError::InvalidResponse(format!(
                        "repository handle '{}' is not owner/name",
                        handle.id
                    ))
                })?;
                self.source.delete_repo(owner, name).await
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    Deleted,
    /// The delete reported not-found; nothing is left to clean up
    AlreadyGone,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackAttempt {
    pub handle: ResourceHandle,
    pub outcome: RollbackOutcome,
}

impl RollbackAttempt {
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            RollbackOutcome::Failed(message) => Some(message),
            RollbackOutcome::Deleted | RollbackOutcome::AlreadyGone => None,
        }
    }
}

/// Every delete attempted by one rollback, in the order attempted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub attempts: Vec<RollbackAttempt>,
}

impl RollbackReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// True when no resource is known to remain
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.attempts.iter().all(|a| a.error().is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &RollbackAttempt> {
        self.attempts.iter().filter(|a| a.error().is_some())
    }

    #[must_use]
    pub fn to_summary(&self) -> RollbackSummary {
        let mut summary = RollbackSummary::default();
        for attempt in &self.attempts {
            let name = attempt.handle.to_string();
            match &attempt.outcome {
                RollbackOutcome::Deleted | RollbackOutcome::AlreadyGone => {
                    summary.deleted.push(name.clone());
                }
                RollbackOutcome::Failed(message) => {
                    summary.failures.push(format!("{name}: {message}"));
                }
            }
            summary.attempted.push(name);
        }
        summary
    }
}

/// Delete every tracked resource, newest first.
pub async fn compensate(tracker: &ResourceTracker, compensator: &dyn Compensator) -> RollbackReport {
    let mut report = RollbackReport::default();
    if tracker.is_empty() {
        return report;
    }

    tracing::info!(resources = tracker.len(), "Rolling back created resources");
    for handle in tracker.handles().iter().rev() {
        let result = tokio::time::timeout(DELETE_TIMEOUT, compensator.delete(handle)).await;
        let outcome = match result {
            Ok(Ok(())) => {
                tracing::info!(kind = %handle.kind, id = %handle.id, "Deleted resource");
                RollbackOutcome::Deleted
            }
            Ok(Err(e)) if e.is_not_found() => {
                tracing::info!(kind = %handle.kind, id = %handle.id, "Resource already gone");
                RollbackOutcome::AlreadyGone
            }
            Ok(Err(e)) => {
                let message = redact_message(&e.to_string());
                tracing::warn!(kind = %handle.kind, id = %handle.id, error = %message, "Rollback delete failed");
                RollbackOutcome::Failed(message)
            }
            Err(_) => {
                let message = format!("no answer within {}s", DELETE_TIMEOUT.as_secs());
                tracing::warn!(kind = %handle.kind, id = %handle.id, error = %message, "Rollback delete timed out");
                RollbackOutcome::Failed(message)
            }
        };
        report.attempts.push(RollbackAttempt {
            handle: handle.clone(),
            outcome,
        });
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records delete order; fails the ids in `failing`.
    #[derive(Default)]
    struct RecordingCompensator {
        deleted: Mutex<Vec<String>>,
        failing: HashSet<String>,
        missing: HashSet<String>,
    }

    #[async_trait]
    impl Compensator for RecordingCompensator {
        async fn delete(&self, handle: &ResourceHandle) -> Result<(), ProviderError> {
            self.deleted.lock().unwrap().push(handle.id.clone());
            if self.failing.contains(&handle.id) {
                return Err(ProviderError::Outage("502 Bad Gateway".to_string()));
            }
            if self.missing.contains(&handle.id) {
                return Err(ProviderError::NotFound("gone".to_string()));
            }
            Ok(())
        }
    }

    fn tracker(ids: &[&str]) -> ResourceTracker {
        let mut tracker = ResourceTracker::new();
        for (i, id) in ids.iter().enumerate() {
            let kind = if i % 2 == 0 {
                ResourceKind::CloudProject
            } else {
                ResourceKind::RemoteRepo
            };
            tracker.record(ResourceHandle::new(kind, *id, *id));
        }
        tracker
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[tokio::test]
    async fn test_reverse_order() {
        let compensator = RecordingCompensator::default();
        let report = compensate(&tracker(&["a", "b", "c"]), &compensator).await;

        assert_eq!(*compensator.deleted.lock().unwrap(), ["c", "b", "a"]);
        assert!(report.is_clean());
        assert_eq!(report.to_summary().deleted.len(), 3);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_rollback() {
        let compensator = RecordingCompensator {
            failing: HashSet::from(["c".to_string(), "b".to_string()]),
            missing: HashSet::from(["a".to_string()]),
            ..Default::default()
        };
        let report = compensate(&tracker(&["a", "b", "c"]), &compensator).await;

        assert_eq!(compensator.deleted.lock().unwrap().len(), 3);
        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.attempts[2].outcome, RollbackOutcome::AlreadyGone);

        let summary = report.to_summary();
        assert!(!summary.is_clean());
        assert!(summary.failures[0].contains("502 Bad Gateway"));
    }

    #[tokio::test]
    async fn test_empty_tracker_is_a_no_op() {
        let compensator = RecordingCompensator::default();
        let report = compensate(&ResourceTracker::new(), &compensator).await;
        assert!(report.is_empty());
        assert!(compensator.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_delete_times_out() {
        struct Hangs;

        #[async_trait]
        impl Compensator for Hangs {
            async fn delete(&self, _handle: &ResourceHandle) -> Result<(), ProviderError> {
                std::future::pending().await
            }
        }

        let report = compensate(&tracker(&["a", "b"]), &Hangs).await;
        assert_eq!(report.failures().count(), 2);
    }

    proptest! {
        #[test]
        fn prop_every_handle_attempted_in_reverse(
            n in 1usize..12,
            fail_mask in proptest::collection::vec(any::<bool>(), 12),
        ) {
            let ids: Vec<String> = (0..n).map(|i| format!("res-{i}")).collect();
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let failing = ids
                .iter()
                .zip(&fail_mask)
                .filter(|(_, fail)| **fail)
                .map(|(id, _)| id.clone())
                .collect();
            let compensator = RecordingCompensator { failing, ..Default::default() };

            let report = block_on(compensate(&tracker(&id_refs), &compensator));

            let mut expected = ids.clone();
            expected.reverse();
            prop_assert_eq!(compensator.deleted.lock().unwrap().clone(), expected);
            prop_assert_eq!(report.attempts.len(), n);
        }
    }
}
