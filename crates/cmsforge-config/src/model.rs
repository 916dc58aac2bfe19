use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_SUBPROCESS_TIMEOUT_SECS: u64 = 900;

pub const DEFAULT_SERVICE_ATTEMPTS: u32 = 30;
pub const DEFAULT_SERVICE_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_SERVICE_INITIAL_DELAY_SECS: u64 = 30;

pub const DEFAULT_CI_ATTEMPTS: u32 = 90;
pub const DEFAULT_CI_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_CI_INITIAL_DELAY_SECS: u64 = 5;

/// Where a configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Command-line flag (highest precedence)
    Cli,
    /// Project configuration file
    ConfigFile(PathBuf),
    /// Environment variable
    Env,
    /// User credential file
    CredentialFile(PathBuf),
    /// Entered at the interactive prompt
    Prompt,
    /// Built-in default (lowest precedence)
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::ConfigFile(path) => write!(f, "config ({})", path.display()),
            Self::Env => write!(f, "env"),
            Self::CredentialFile(path) => write!(f, "credentials ({})", path.display()),
            Self::Prompt => write!(f, "prompt"),
            Self::Defaults => write!(f, "default"),
        }
    }
}

/// `[project]` section
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectSettings {
    /// GitHub user or organization that owns new repositories
    pub owner: Option<String>,
    /// Create public repositories instead of private ones
    pub public: Option<bool>,
    /// Default branch pushed and watched by CI
    pub branch: Option<String>,
}

/// `[polling]` section; all durations in seconds
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PollingSettings {
    pub service_attempts: Option<u32>,
    pub service_interval_secs: Option<u64>,
    pub service_initial_delay_secs: Option<u64>,
    pub ci_attempts: Option<u32>,
    pub ci_interval_secs: Option<u64>,
    pub ci_initial_delay_secs: Option<u64>,
}

/// `[commands]` section
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandSettings {
    /// argv used to install dependencies, e.g. `["npm", "install"]`
    pub install: Option<Vec<String>>,
    /// argv used to seed the database
    pub seed: Option<Vec<String>>,
    /// Wall-clock limit for each subprocess
    pub timeout_secs: Option<u64>,
}

/// `[deploy]` section
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeploySettings {
    /// Path probed on the public domain to decide readiness
    pub health_path: Option<String>,
}

/// Effective configuration after discovery and CLI overrides
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub project: ProjectSettings,
    pub polling: PollingSettings,
    pub commands: CommandSettings,
    pub deploy: DeploySettings,
    /// Configuration file that was loaded, if any
    pub config_path: Option<PathBuf>,
    pub source_attribution: HashMap<String, ConfigSource>,
}

impl Config {
    #[must_use]
    pub fn health_path(&self) -> &str {
        self.deploy.health_path.as_deref().unwrap_or(DEFAULT_HEALTH_PATH)
    }

    #[must_use]
    pub fn branch(&self) -> &str {
        self.project.branch.as_deref().unwrap_or(DEFAULT_BRANCH)
    }

    #[must_use]
    pub fn public_repo(&self) -> bool {
        self.project.public.unwrap_or(false)
    }

    #[must_use]
    pub fn install_command(&self) -> Vec<String> {
        self.commands
            .install
            .clone()
            .unwrap_or_else(|| vec!["npm".to_string(), "install".to_string()])
    }

    #[must_use]
    pub fn seed_command(&self) -> Vec<String> {
        self.commands
            .seed
            .clone()
            .unwrap_or_else(|| vec!["npm".to_string(), "run".to_string(), "seed".to_string()])
    }

    #[must_use]
    pub fn subprocess_timeout_secs(&self) -> u64 {
        self.commands
            .timeout_secs
            .unwrap_or(DEFAULT_SUBPROCESS_TIMEOUT_SECS)
    }

    /// Source of `key`, `Defaults` when never set
    #[must_use]
    pub fn source_of(&self, key: &str) -> ConfigSource {
        self.source_attribution
            .get(key)
            .cloned()
            .unwrap_or(ConfigSource::Defaults)
    }
}
