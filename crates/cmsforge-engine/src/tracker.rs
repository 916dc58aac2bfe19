use std::fmt;

use cmsforge_provision_api::{CloudProject, RemoteRepo};

/// Kinds of external resource a run can leave behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    CloudProject,
    RemoteRepo,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CloudProject => f.write_str("cloud project"),
            Self::RemoteRepo => f.write_str("repository"),
        }
    }
}

/// Identifier of one created resource.
///
/// `id` is what the compensating delete needs: the project id for a cloud
/// project, `owner/name` for a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub id: String,
    /// Human-readable name for progress and error output
    pub label: String,
}

impl ResourceHandle {
    #[must_use]
    pub fn new(kind: ResourceKind, id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            label: label.into(),
        }
    }

    #[must_use]
    pub fn cloud_project(project: &CloudProject) -> Self {
        Self::new(ResourceKind::CloudProject, &project.project_id, &project.name)
    }

    #[must_use]
    pub fn remote_repo(repo: &RemoteRepo) -> Self {
        Self::new(ResourceKind::RemoteRepo, repo.full_name(), &repo.html_url)
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.label)
    }
}

/// Append-only record of created resources, in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTracker {
    handles: Vec<ResourceHandle>,
}

impl ResourceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, handle: ResourceHandle) {
        tracing::debug!(kind = %handle.kind, id = %handle.id, "Recorded resource");
        self.handles.push(handle);
    }

    #[must_use]
    pub fn handles(&self) -> &[ResourceHandle] {
        &self.handles
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    #[must_use]
    pub fn into_handles(self) -> Vec<ResourceHandle> {
        self.handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_keep_creation_order() {
        let mut tracker = ResourceTracker::new();
        let project = CloudProject {
            project_id: "proj-1".to_string(),
            environment_id: "env-1".to_string(),
            name: "acme-site".to_string(),
        };
        let repo = RemoteRepo {
            owner: "acme".to_string(),
            name: "site".to_string(),
            clone_url: "https://github.com/acme/site.git".to_string(),
            html_url: "https://github.com/acme/site".to_string(),
        };

        tracker.record(ResourceHandle::cloud_project(&project));
        tracker.record(ResourceHandle::remote_repo(&repo));

        let ids: Vec<&str> = tracker.handles().iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, ["proj-1", "acme/site"]);
        assert_eq!(
            tracker.handles()[1].to_string(),
            "repository https://github.com/acme/site"
        );
    }
}
