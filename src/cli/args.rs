//! CLI argument definitions and parsing structures

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use cmsforge_config::CliArgs;

/// cmsforge - scaffold a starter CMS and provision it end to end
#[derive(Parser, Debug)]
#[command(name = "cmsforge")]
#[command(about = "Scaffold a starter CMS and provision its database, repository, deployment and CI")]
#[command(long_about = r#"
cmsforge generates a small CMS project locally, then creates a Railway
project with a Postgres database, a GitHub repository, a deploy service and a
CI run, waiting for each to become ready. If any step fails, every remote
resource created so far is deleted again.

EXAMPLES:
  # Provision a new site under your GitHub account
  cmsforge new acme-site

  # Provision into an organization, skipping the CI run
  cmsforge new acme-site --owner acme --skip-ci

  # Show the effective configuration and where each value came from
  cmsforge config --json

  # Wait for an already deployed URL to answer
  cmsforge probe https://acme-site.up.railway.app/health --attempts 10

CONFIGURATION:
  Precedence: CLI flags > config file > defaults
  The config file is discovered by searching upward from CWD for
  .cmsforge/config.toml; use --config to name one explicitly.
  Tokens come from RAILWAY_TOKEN / GITHUB_TOKEN, then the user credential
  file, then an interactive prompt.

EXIT CODES:
  0 success, 1 internal error, 2 invalid arguments or configuration,
  3 pre-flight check failed, 4 provisioning step failed, 10 wait timed out
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold and provision a new project
    New {
        /// Project name (lowercase letters, digits and hyphens)
        name: String,

        /// Directory to generate into (default: ./<name>)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// GitHub user or organization that owns the repository
        #[arg(long)]
        owner: Option<String>,

        /// Create a public repository
        #[arg(long)]
        public: bool,

        /// Branch to push and deploy
        #[arg(long)]
        branch: Option<String>,

        /// Path the readiness probe requests on the deployed service
        #[arg(long)]
        health_path: Option<String>,

        /// Do not trigger and wait for a CI run
        #[arg(long)]
        skip_ci: bool,

        /// Fail instead of prompting for missing tokens
        #[arg(long)]
        non_interactive: bool,

        /// Free-form description of the content schema
        #[arg(long)]
        schema: Option<String>,
    },

    /// Show the effective configuration with sources (tokens masked)
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Poll a URL until it answers or the attempt budget runs out
    Probe {
        url: String,

        /// Maximum number of requests
        #[arg(long, default_value_t = 5)]
        attempts: u32,

        /// Seconds between requests
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}

impl Cli {
    /// Overrides for the configuration system
    #[must_use]
    pub fn config_overrides(&self) -> CliArgs {
        let mut args = CliArgs {
            config_path: self.config.clone(),
            ..CliArgs::default()
        };
        if let Commands::New {
            owner,
            public,
            branch,
            health_path,
            ..
        } = &self.command
        {
            args.owner = owner.clone();
            args.public = public.then_some(true);
            args.branch = branch.clone();
            args.health_path = health_path.clone();
        }
        args
    }
}

/// The clap command, for completions and introspection.
#[must_use]
pub fn build_cli() -> clap::Command {
    Cli::command()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_new_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "cmsforge",
            "new",
            "acme-site",
            "--owner",
            "acme",
            "--public",
            "--health-path",
            "/ready",
            "--config",
            "custom.toml",
        ])
        .unwrap();
        let args = cli.config_overrides();

        assert_eq!(args.owner.as_deref(), Some("acme"));
        assert_eq!(args.public, Some(true));
        assert_eq!(args.health_path.as_deref(), Some("/ready"));
        assert_eq!(args.config_path, Some(PathBuf::from("custom.toml")));
        assert_eq!(args.branch, None);
    }

    #[test]
    fn test_public_flag_absent_leaves_config_in_charge() {
        let cli = Cli::try_parse_from(["cmsforge", "new", "acme-site"]).unwrap();
        assert_eq!(cli.config_overrides().public, None);
    }

    #[test]
    fn test_probe_defaults() {
        let cli = Cli::try_parse_from(["cmsforge", "probe", "http://localhost:3000"]).unwrap();
        let Commands::Probe { attempts, interval, .. } = cli.command else {
            panic!("expected probe");
        };
        assert_eq!((attempts, interval), (5, 5));
    }
}
