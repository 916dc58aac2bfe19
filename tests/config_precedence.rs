//! Configuration precedence as the CLI sees it: flags over the discovered
//! file over built-in defaults, with the source of every value recorded.

use anyhow::Result;
use serial_test::serial;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

use cmsforge::cli::Cli;
use cmsforge::{CliArgs, Config, ConfigSource};
use clap::Parser;
use cmsforge_config::{Credentials, ProvisionRequest, Secret};

const PROJECT_CONFIG: &str = r#"
[project]
owner = "acme"
branch = "trunk"

[polling]
service_attempts = 12
ci_attempts = 40

[deploy]
health_path = "/api/health"
"#;

fn workspace() -> Result<TempDir> {
    let temp = TempDir::new()?;
    fs::create_dir(temp.path().join(".git"))?;
    fs::create_dir(temp.path().join(".cmsforge"))?;
    fs::write(temp.path().join(".cmsforge/config.toml"), PROJECT_CONFIG)?;
    fs::create_dir_all(temp.path().join("sites/blog"))?;
    Ok(temp)
}

fn credentials() -> Credentials {
    Credentials {
        railway_token: Secret::new("rw"),
        github_token: Secret::new("gh"),
        sources: Default::default(),
    }
}

#[test]
fn test_file_discovered_from_nested_directory() -> Result<()> {
    let temp = workspace()?;
    let config = Config::discover_from(&temp.path().join("sites/blog"), &CliArgs::default())?;

    assert_eq!(config.branch(), "trunk");
    assert_eq!(config.health_path(), "/api/health");
    assert!(matches!(config.source_of("branch"), ConfigSource::ConfigFile(_)));
    assert_eq!(config.source_of("public"), ConfigSource::Defaults);
    Ok(())
}

#[test]
fn test_cli_flags_override_file() -> Result<()> {
    let temp = workspace()?;
    let cli = Cli::try_parse_from([
        "cmsforge",
        "new",
        "acme-site",
        "--owner",
        "acme-labs",
        "--public",
        "--health-path",
        "/ready",
    ])?;
    let config = Config::discover_from(temp.path(), &cli.config_overrides())?;

    assert_eq!(config.project.owner.as_deref(), Some("acme-labs"));
    assert!(config.public_repo());
    assert_eq!(config.health_path(), "/ready");
    assert_eq!(config.branch(), "trunk");
    assert_eq!(config.source_of("owner"), ConfigSource::Cli);

    let effective = config.effective_config();
    assert_eq!(effective["health_path"], ("/ready".to_string(), "cli".to_string()));
    Ok(())
}

#[test]
fn test_file_settings_reach_the_provision_config() -> Result<()> {
    let temp = workspace()?;
    let config = Config::discover_from(temp.path(), &CliArgs::default())?;
    let request = ProvisionRequest {
        project_name: "acme-site".to_string(),
        target_dir: None,
        skip_ci: false,
        schema: None,
    };
    let provision = config.provision_config(request, credentials());

    assert_eq!(provision.repo_owner.as_deref(), Some("acme"));
    assert_eq!(provision.service_poll.max_attempts, 12);
    assert_eq!(provision.service_poll.interval, Duration::from_secs(10));
    assert_eq!(provision.ci_poll.map(|p| p.max_attempts), Some(40));
    assert_eq!(provision.target_dir, std::path::PathBuf::from("acme-site"));
    Ok(())
}

#[test]
fn test_invalid_file_value_is_rejected() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("bad.toml");
    fs::write(&path, "[polling]\nservice_attempts = 0\n")?;

    let args = CliArgs {
        config_path: Some(path),
        ..CliArgs::default()
    };
    assert!(Config::discover_from(temp.path(), &args).is_err());
    Ok(())
}

#[test]
#[serial]
fn test_discover_uses_current_directory() -> Result<()> {
    let temp = workspace()?;
    let original = std::env::current_dir()?;
    std::env::set_current_dir(temp.path().join("sites"))?;
    let result = Config::discover(&CliArgs::default());
    std::env::set_current_dir(original)?;

    let config = result?;
    assert_eq!(config.branch(), "trunk");
    assert!(config.config_path.is_some());
    Ok(())
}
