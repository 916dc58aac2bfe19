//! GitHub REST client implementing [`SourceHost`]
//!
//! Repository management goes over the REST API. Publishing code shells out to
//! the local `git` through a [`SubprocessRunner`], with the token embedded only
//! in the transient push URL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use cmsforge_provision_api::{
    OutputSink, PipelineRun, ProviderError, PushRequest, RemoteRepo, RepoRequest, SourceHost,
};
use cmsforge_runner::{CommandSpec, SubprocessError, SubprocessRunner};
use cmsforge_utils::redaction::redact_message;

use crate::http_client::{HttpClient, decode_json};
use crate::sealed::seal_secret;

const PROVIDER: &str = "GitHub";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const RUNS_PAGE_SIZE: u32 = 20;
const DISPATCH_EVENT: &str = "workflow_dispatch";

const COMMIT_AUTHOR: &str = "cmsforge";
const COMMIT_EMAIL: &str = "cmsforge@users.noreply.github.com";

#[derive(Debug, Deserialize)]
struct UserBody {
    login: String,
}

#[derive(Debug, Deserialize)]
struct OwnerBody {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoBody {
    name: String,
    owner: OwnerBody,
    clone_url: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct PublicKeyBody {
    key_id: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct RunsBody {
    workflow_runs: Vec<RunBody>,
}

#[derive(Debug, Deserialize)]
struct RunBody {
    id: u64,
    #[serde(default)]
    event: Option<String>,
    status: Option<String>,
    conclusion: Option<String>,
    html_url: String,
    created_at: DateTime<Utc>,
}

/// Client for the GitHub REST API plus local `git`
pub struct GitHubClient {
    http: HttpClient,
    api_base: String,
    token: String,
    runner: Arc<dyn SubprocessRunner>,
}

impl GitHubClient {
    #[must_use]
    pub fn new(http: HttpClient, token: impl Into<String>, runner: Arc<dyn SubprocessRunner>) -> Self {
        Self {
            http,
            api_base: DEFAULT_GITHUB_API.to_string(),
            token: token.into(),
            runner,
        }
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .inner()
            .request(method, format!("{}{path}", self.api_base))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn authenticated_login(&self) -> Result<String, ProviderError> {
        let user: UserBody = self
            .http
            .send_json(self.request(reqwest::Method::GET, "/user"), PROVIDER)
            .await?;
        Ok(user.login)
    }

    async fn git(&self, cmd: CommandSpec, on_line: OutputSink<'_>) -> Result<(), ProviderError> {
        self.runner
            .run_streaming(&cmd, on_line)
            .await
            .map_err(map_git_error)
    }
}

fn map_git_error(err: SubprocessError) -> ProviderError {
    let message = redact_message(&err.to_string());
    if err.is_timeout() {
        ProviderError::Timeout(message)
    } else {
        ProviderError::Command(message)
    }
}

/// Embed the token in an `https://` clone URL for a single push.
fn authenticated_url(clone_url: &str, token: &str) -> String {
    match clone_url.strip_prefix("https://") {
        Some(rest) => format!("https://x-access-token:{token}@{rest}"),
        None => clone_url.to_string(),
    }
}

/// Most recent dispatched run created at or after `since`.
///
/// Push-triggered runs of the same workflow are skipped even if the server
/// ignored the `event` filter.
fn newest_run_since(runs: Vec<RunBody>, since: DateTime<Utc>) -> Option<PipelineRun> {
    runs.into_iter()
        .filter(|run| run.event.as_deref().is_none_or(|event| event == DISPATCH_EVENT))
        .filter(|run| run.created_at >= since)
        .max_by_key(|run| (run.created_at, run.id))
        .map(|run| PipelineRun {
            id: run.id,
            status: run.status.unwrap_or_else(|| "queued".to_string()),
            conclusion: run.conclusion,
            html_url: run.html_url,
        })
}

#[async_trait]
impl SourceHost for GitHubClient {
    async fn create_repo(&self, request: &RepoRequest) -> Result<RemoteRepo, ProviderError> {
        let login = self.authenticated_login().await?;
        let (owner, path) = match request.owner.as_deref() {
            Some(owner) if !owner.eq_ignore_ascii_case(&login) => {
                (owner.to_string(), format!("/orgs/{owner}/repos"))
            }
            _ => (login, "/user/repos".to_string()),
        };

        let body = json!({
            "name": request.name,
            "private": request.private,
            "description": request.description,
            "auto_init": false,
        });
        // Sent once: a resend after a lost response fails with "name already
        // exists" and leaves the first repository behind.
        let response = self
            .http
            .execute_once(self.request(reqwest::Method::POST, &path).json(&body), PROVIDER)
            .await?;
        let repo: RepoBody = match decode_json(response, PROVIDER).await {
            Ok(repo) => repo,
            Err(e) => {
                // The repository exists but cannot be handed back for rollback.
                let message = match self.delete_repo(&owner, &request.name).await {
                    Ok(()) => e.to_string(),
                    Err(cleanup) if cleanup.is_not_found() => e.to_string(),
                    Err(cleanup) => {
                        tracing::warn!(repo = %format!("{owner}/{}", request.name), error = %cleanup, "Could not delete undecodable repository");
                        format!("{e}; delete {owner}/{} manually", request.name)
                    }
                };
                return Err(ProviderError::InvalidResponse(message));
            }
        };

        tracing::info!(repo = %format!("{}/{}", repo.owner.login, repo.name), "Created repository");
        Ok(RemoteRepo {
            owner: repo.owner.login,
            name: repo.name,
            clone_url: repo.clone_url,
            html_url: repo.html_url,
        })
    }

    async fn push(
        &self,
        request: &PushRequest,
        on_line: OutputSink<'_>,
    ) -> Result<(), ProviderError> {
        let git = || {
            CommandSpec::new("git")
                .cwd(&request.dir)
                .env("GIT_TERMINAL_PROMPT", "0")
        };

        self.git(git().arg("init"), &mut *on_line).await?;
        self.git(git().args(["add", "-A"]), &mut *on_line).await?;
        self.git(
            git()
                .arg("-c")
                .arg(format!("user.name={COMMIT_AUTHOR}"))
                .arg("-c")
                .arg(format!("user.email={COMMIT_EMAIL}"))
                .args(["commit", "--quiet", "-m"])
                .arg(&request.commit_message),
            &mut *on_line,
        )
        .await?;
        self.git(git().args(["branch", "-M"]).arg(&request.branch), &mut *on_line)
            .await?;

        let remote = authenticated_url(&request.clone_url, &self.token);
        self.git(
            git()
                .args(["push", "--progress", "-u"])
                .arg(remote)
                .arg(&request.branch),
            &mut *on_line,
        )
        .await
    }

    async fn set_secrets(
        &self,
        repo: &RemoteRepo,
        secrets: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        if secrets.is_empty() {
            return Ok(());
        }

        let base = format!("/repos/{}/{}/actions/secrets", repo.owner, repo.name);
        let key: PublicKeyBody = self
            .http
            .send_json(
                self.request(reqwest::Method::GET, &format!("{base}/public-key")),
                PROVIDER,
            )
            .await?;

        for (name, value) in secrets {
            let body = json!({
                "encrypted_value": seal_secret(&key.key, value)?,
                "key_id": key.key_id,
            });
            self.http
                .execute_with_retry(
                    self.request(reqwest::Method::PUT, &format!("{base}/{name}"))
                        .json(&body),
                    PROVIDER,
                )
                .await?;
            tracing::debug!(repo = %repo.full_name(), secret = %name, "Stored repository secret");
        }
        Ok(())
    }

    async fn delete_repo(&self, owner: &str, name: &str) -> Result<(), ProviderError> {
        self.http
            .execute_with_retry(
                self.request(reqwest::Method::DELETE, &format!("/repos/{owner}/{name}")),
                PROVIDER,
            )
            .await?;
        tracing::info!(repo = %format!("{owner}/{name}"), "Deleted repository");
        Ok(())
    }

    async fn dispatch_pipeline(
        &self,
        repo: &RemoteRepo,
        workflow: &str,
        branch: &str,
    ) -> Result<(), ProviderError> {
        let path = format!(
            "/repos/{}/{}/actions/workflows/{workflow}/dispatches",
            repo.owner, repo.name
        );
        // A resent dispatch would start a second run.
        self.http
            .execute_once(
                self.request(reqwest::Method::POST, &path)
                    .json(&json!({ "ref": branch })),
                PROVIDER,
            )
            .await?;
        Ok(())
    }

    async fn latest_pipeline_run(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<PipelineRun>, ProviderError> {
        let path = format!(
            "/repos/{owner}/{name}/actions/runs?event={DISPATCH_EVENT}&branch={branch}&per_page={RUNS_PAGE_SIZE}"
        );
        let runs: RunsBody = self
            .http
            .send_json(self.request(reqwest::Method::GET, &path), PROVIDER)
            .await?;
        Ok(newest_run_since(runs.workflow_runs, since))
    }
}
