//! `cmsforge new`: the full provisioning run

use anyhow::Result;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use cmsforge_clients::{GitHubClient, HttpClient, HttpProbe, RailwayClient};
use cmsforge_config::validation::check_project_slug;
use cmsforge_config::{Config, CredentialResolver, ProvisionConfig, ProvisionRequest, StdinPrompter};
use cmsforge_engine::{
    CollaboratorCompensator, Collaborators, OrchestrationOutcome, Orchestrator, ProvisionSummary,
    standard_plan,
};
use cmsforge_runner::StreamingRunner;
use cmsforge_scaffold::TemplateScaffolder;
use cmsforge_utils::CmsForgeError;
use cmsforge_utils::error::PreflightError;

use crate::display::{self, DisplayMode};

pub struct NewOptions {
    pub name: String,
    pub dir: Option<PathBuf>,
    pub skip_ci: bool,
    pub non_interactive: bool,
    pub schema: Option<String>,
}

pub async fn execute(config: &Config, options: NewOptions) -> Result<()> {
    let request = ProvisionRequest {
        project_name: options.name,
        target_dir: options.dir,
        skip_ci: options.skip_ci,
        schema: options.schema,
    };
    // Local problems are reported before anyone is asked for a token.
    check_request(&request)?;

    let prompter = StdinPrompter;
    let mut resolver = CredentialResolver::new();
    if !options.non_interactive && std::io::stdin().is_terminal() {
        resolver = resolver.with_prompter(&prompter);
    }
    let credentials = resolver.resolve().map_err(CmsForgeError::from)?;

    let provision = config.provision_config(request, credentials);
    let collaborators = collaborators(&provision)?;
    let plan = standard_plan(&provision, &collaborators);
    let compensator = Arc::new(CollaboratorCompensator::new(
        collaborators.cloud.clone(),
        collaborators.source.clone(),
    ));

    let orchestrator = Orchestrator::new(compensator);
    let renderer = display::spawn(orchestrator.subscribe(), DisplayMode::detect());
    let outcome = orchestrator.run(&plan).await;
    // Dropping the orchestrator closes the progress channel and ends the renderer.
    drop(orchestrator);
    if let Err(e) = renderer.await {
        tracing::debug!(error = %e, "Progress display task ended abnormally");
    }

    match outcome.map_err(CmsForgeError::from)? {
        OrchestrationOutcome::Succeeded(summary) => {
            println!();
            for line in summary_lines(&summary) {
                println!("{line}");
            }
            Ok(())
        }
        OrchestrationOutcome::Failed(failure) => {
            println!();
            Err(CmsForgeError::from(failure.into_error()).into())
        }
    }
}

fn check_request(request: &ProvisionRequest) -> Result<(), CmsForgeError> {
    check_project_slug(&request.project_name).map_err(|reason| {
        PreflightError::InvalidProjectName {
            name: request.project_name.clone(),
            reason: reason.to_string(),
        }
    })?;

    let target = request
        .target_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&request.project_name));
    if target.exists() {
        return Err(PreflightError::TargetExists { path: target }.into());
    }
    Ok(())
}

fn collaborators(provision: &ProvisionConfig) -> Result<Collaborators, CmsForgeError> {
    let http = HttpClient::new()
        .map_err(|e| CmsForgeError::Runtime(format!("cannot build HTTP client: {e}")))?;
    let runner = Arc::new(StreamingRunner::new().with_timeout(provision.subprocess_timeout));
    let credentials = &provision.credentials;

    Ok(Collaborators {
        cloud: Arc::new(RailwayClient::new(
            http.clone(),
            credentials.railway_token.expose(),
        )),
        source: Arc::new(GitHubClient::new(
            http.clone(),
            credentials.github_token.expose(),
            runner.clone(),
        )),
        scaffolder: Arc::new(TemplateScaffolder::new()),
        probe: Arc::new(HttpProbe::new(http)),
        runner,
    })
}

/// What the user needs after a successful run. No credentials or connection
/// strings.
fn summary_lines(summary: &ProvisionSummary) -> Vec<String> {
    let ctx = &summary.context;
    let mut lines = vec![format!("✓ {} is provisioned", ctx.project_name)];
    if let Some(url) = &ctx.public_url {
        lines.push(format!("  Live at:     {url}"));
    }
    if let Some(repo) = &ctx.repository {
        lines.push(format!("  Repository:  {}", repo.html_url));
    }
    if let Some(run) = &ctx.pipeline_run {
        lines.push(format!("  CI run:      {}", run.html_url));
    }
    lines.push(format!("  Local files: {}", ctx.target_dir.display()));
    if !summary.resources.is_empty() {
        lines.push("  Created:".to_string());
        lines.extend(summary.resources.iter().map(|r| format!("    - {r}")));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmsforge_engine::{ResourceHandle, ResourceKind, RunContext};
    use cmsforge_provision_api::RemoteRepo;

    fn request(name: &str, dir: Option<PathBuf>) -> ProvisionRequest {
        ProvisionRequest {
            project_name: name.to_string(),
            target_dir: dir,
            skip_ci: false,
            schema: None,
        }
    }

    #[test]
    fn test_check_request_rejects_bad_name() {
        let err = check_request(&request("Acme Site", None)).unwrap_err();
        assert!(matches!(
            err,
            CmsForgeError::Preflight(PreflightError::InvalidProjectName { .. })
        ));
    }

    #[test]
    fn test_check_request_rejects_existing_target() {
        let temp = tempfile::tempdir().unwrap();
        let err = check_request(&request("acme-site", Some(temp.path().to_path_buf()))).unwrap_err();
        assert!(matches!(
            err,
            CmsForgeError::Preflight(PreflightError::TargetExists { .. })
        ));
    }

    #[test]
    fn test_summary_lists_url_repo_and_resources() {
        let mut context = RunContext::new("acme-site", "/work/acme-site");
        context.public_url = Some("https://acme-site.up.railway.app".to_string());
        context.repository = Some(RemoteRepo {
            owner: "acme".to_string(),
            name: "acme-site".to_string(),
            clone_url: "https://github.com/acme/acme-site.git".to_string(),
            html_url: "https://github.com/acme/acme-site".to_string(),
        });
        let summary = ProvisionSummary {
            context,
            resources: vec![ResourceHandle::new(
                ResourceKind::CloudProject,
                "proj-1",
                "acme-site",
            )],
        };

        let text = summary_lines(&summary).join("\n");
        assert!(text.contains("Live at:     https://acme-site.up.railway.app"));
        assert!(text.contains("https://github.com/acme/acme-site"));
        assert!(text.contains("- cloud project acme-site"));
    }
}
