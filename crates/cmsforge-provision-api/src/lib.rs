//! Collaborator contracts for the provisioning orchestrator
//!
//! The orchestrator talks to the cloud platform, the source host, the
//! scaffolder and the deployed application only through the traits in this
//! crate. Real implementations live in `cmsforge-clients` and
//! `cmsforge-scaffold`; tests substitute in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Callback receiving streamed output lines (e.g. from `git push`).
pub type OutputSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Failure reported by a remote collaborator.
///
/// Every variant carries a human-readable message that is already free of
/// credentials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 401/403 or a token that lacks a scope
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// 5xx after retries
    #[error("service unavailable: {0}")]
    Outage(String),

    /// Connection, DNS or TLS failure after retries
    #[error("network error: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// The response could not be decoded or violated the API contract
    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// A local tool run on behalf of the collaborator failed
    #[error("{0}")]
    Command(String),
}

impl ProviderError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Identifiers of a newly created cloud project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudProject {
    pub project_id: String,
    pub environment_id: String,
    pub name: String,
}

/// Database created inside a cloud project
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub service_id: String,
    /// Full connection string including the password
    pub connection_string: String,
}

impl std::fmt::Debug for DatabaseInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseInfo")
            .field("service_id", &self.service_id)
            .field("connection_string", &"<redacted>")
            .finish()
    }
}

/// Deploy service to create from a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    /// `owner/name` of the source repository
    pub repo: String,
    pub branch: String,
}

/// Repository to create on the source host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRequest {
    pub name: String,
    /// Organization to create under; `None` means the token's user
    pub owner: Option<String>,
    pub private: bool,
    pub description: String,
}

/// A repository on the source host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    pub owner: String,
    pub name: String,
    pub clone_url: String,
    pub html_url: String,
}

impl RemoteRepo {
    /// `owner/name`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Local repository contents to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub dir: PathBuf,
    pub clone_url: String,
    pub branch: String,
    pub commit_message: String,
}

/// State of a CI pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub id: u64,
    /// Provider status text, e.g. `queued`, `in_progress`, `completed`
    pub status: String,
    /// Set once completed, e.g. `success`, `failure`, `cancelled`
    pub conclusion: Option<String>,
    pub html_url: String,
}

impl PipelineRun {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == "completed"
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.is_complete() && self.conclusion.as_deref() == Some("success")
    }

    /// Short status line for progress display
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.conclusion {
            Some(conclusion) => format!("{} ({conclusion})", self.status),
            None => self.status.replace('_', " "),
        }
    }
}

/// Infrastructure platform hosting the database and the deploy service
#[async_trait]
pub trait CloudPlatform: Send + Sync {
    async fn create_project(&self, name: &str) -> Result<CloudProject, ProviderError>;

    /// Provision a Postgres database and return its connection string.
    async fn provision_database(&self, project: &CloudProject)
    -> Result<DatabaseInfo, ProviderError>;

    /// Create a service deployed from a repository; returns the service id.
    async fn create_service(
        &self,
        project: &CloudProject,
        spec: &ServiceSpec,
    ) -> Result<String, ProviderError>;

    async fn set_variables(
        &self,
        project: &CloudProject,
        service_id: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError>;

    /// Public `https://` base URL of the service, generating a domain if needed.
    async fn get_public_domain(
        &self,
        project: &CloudProject,
        service_id: &str,
    ) -> Result<String, ProviderError>;

    /// Delete the project and everything inside it.
    async fn delete_project(&self, project_id: &str) -> Result<(), ProviderError>;
}

/// Source-hosting platform holding the repository and running CI
#[async_trait]
pub trait SourceHost: Send + Sync {
    async fn create_repo(&self, request: &RepoRequest) -> Result<RemoteRepo, ProviderError>;

    /// Commit the directory and push it, streaming tool output to `on_line`.
    async fn push(
        &self,
        request: &PushRequest,
        on_line: OutputSink<'_>,
    ) -> Result<(), ProviderError>;

    async fn set_secrets(
        &self,
        repo: &RemoteRepo,
        secrets: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError>;

    async fn delete_repo(&self, owner: &str, name: &str) -> Result<(), ProviderError>;

    /// Trigger the workflow `workflow` on `branch`.
    async fn dispatch_pipeline(
        &self,
        repo: &RemoteRepo,
        workflow: &str,
        branch: &str,
    ) -> Result<(), ProviderError>;

    /// Most recent dispatched run on `branch` created at or after `since`,
    /// if any. Runs started by other events (a push) are not returned.
    async fn latest_pipeline_run(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<PipelineRun>, ProviderError>;
}

/// Workflow file a scaffolded project must provide; the CI step dispatches it.
pub const CI_WORKFLOW_FILE: &str = "ci.yml";

/// Inputs the scaffolder needs to render a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldContext {
    pub project_name: String,
    /// Free-form content schema description
    pub schema: Option<String>,
    pub health_path: String,
    pub branch: String,
}

#[derive(Error, Debug)]
pub enum ScaffoldError {
    #[error("target directory {0} already exists")]
    TargetExists(PathBuf),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Generates project files into a fresh directory
pub trait Scaffolder: Send + Sync {
    /// Write the project into `target_dir` and return the files written.
    fn generate(
        &self,
        target_dir: &Path,
        context: &ScaffoldContext,
    ) -> Result<Vec<PathBuf>, ScaffoldError>;
}

/// Readiness check against the deployed application
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// `Ok(true)` once the URL answers with 2xx, 401 or 403.
    async fn check(&self, url: &str) -> Result<bool, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: &str, conclusion: Option<&str>) -> PipelineRun {
        PipelineRun {
            id: 7,
            status: status.to_string(),
            conclusion: conclusion.map(str::to_string),
            html_url: "https://github.com/acme/site/actions/runs/7".to_string(),
        }
    }

    #[test]
    fn test_pipeline_run_states() {
        assert!(!run("queued", None).is_complete());
        assert!(run("completed", Some("success")).succeeded());
        assert!(!run("completed", Some("failure")).succeeded());
        assert_eq!(run("in_progress", None).describe(), "in progress");
        assert_eq!(
            run("completed", Some("failure")).describe(),
            "completed (failure)"
        );
    }

    #[test]
    fn test_database_debug_hides_connection_string() {
        let db = DatabaseInfo {
            service_id: "svc".to_string(),
            connection_string: "postgres://app:hunter2@db:5432/app".to_string(),
        };
        assert!(!format!("{db:?}").contains("hunter2"));
    }

    #[test]
    fn test_repo_full_name() {
        let repo = RemoteRepo {
            owner: "acme".to_string(),
            name: "site".to_string(),
            clone_url: "https://github.com/acme/site.git".to_string(),
            html_url: "https://github.com/acme/site".to_string(),
        };
        assert_eq!(repo.full_name(), "acme/site");
    }

    struct AlwaysReady;

    #[async_trait]
    impl ReadinessProbe for AlwaysReady {
        async fn check(&self, _url: &str) -> Result<bool, ProviderError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_probe_trait_object() {
        let probe: Box<dyn ReadinessProbe> = Box::new(AlwaysReady);
        assert_eq!(probe.check("https://acme.up.railway.app/health").await, Ok(true));
    }
}
