use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cmsforge_utils::error::ConfigError;

use super::{
    CliArgs, CommandSettings, Config, ConfigSource, DeploySettings, PollingSettings,
    ProjectSettings,
};

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    project: Option<ProjectSettings>,
    polling: Option<PollingSettings>,
    commands: Option<CommandSettings>,
    deploy: Option<DeploySettings>,
}

/// Copy `$from.$field` into `$into.$field` when set, recording `$source` for `$key`.
macro_rules! overlay {
    ($attr:ident, $source:expr, $from:expr => $into:expr, { $($field:ident),+ $(,)? }) => {
        $(
            if $from.$field.is_some() {
                $into.$field = $from.$field.clone();
                $attr.insert(stringify!($field).to_string(), $source.clone());
            }
        )+
    };
}

impl Config {
    /// Discover and load configuration with precedence: CLI > file > defaults
    ///
    /// Uses the current working directory for discovery when no explicit path is
    /// given.
    pub fn discover(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let start_dir = std::env::current_dir().map_err(|e| ConfigError::DiscoveryFailed {
            reason: format!("cannot determine current directory: {e}"),
        })?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover and load configuration starting from a specific directory.
    ///
    /// Path-driven variant used by tests to avoid process-global state.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        let mut attribution: HashMap<String, ConfigSource> = HashMap::new();

        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::NotFound {
                        path: explicit.display().to_string(),
                    });
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(start_dir),
        };

        if let Some(path) = &config_path {
            let file = Self::load_config_file(path)?;
            let source = ConfigSource::ConfigFile(path.clone());
            tracing::debug!(path = %path.display(), "Loaded configuration file");

            if let Some(project) = file.project {
                overlay!(attribution, source, project => config.project, { owner, public, branch });
            }
            if let Some(polling) = file.polling {
                overlay!(attribution, source, polling => config.polling, {
                    service_attempts,
                    service_interval_secs,
                    service_initial_delay_secs,
                    ci_attempts,
                    ci_interval_secs,
                    ci_initial_delay_secs,
                });
            }
            if let Some(commands) = file.commands {
                overlay!(attribution, source, commands => config.commands, { install, seed, timeout_secs });
            }
            if let Some(deploy) = file.deploy {
                overlay!(attribution, source, deploy => config.deploy, { health_path });
            }
        }

        // CLI overrides (highest priority)
        let cli = ConfigSource::Cli;
        overlay!(attribution, cli, cli_args => config.project, { owner, public, branch });
        overlay!(attribution, cli, cli_args => config.deploy, { health_path });
        overlay!(attribution, cli, cli_args => config.polling, { service_attempts, service_interval_secs });

        config.config_path = config_path;
        config.source_attribution = attribution;
        config.validate()?;
        Ok(config)
    }

    /// Walk upward from `start_dir` looking for `.cmsforge/config.toml`.
    ///
    /// Stops at the filesystem root or at the first directory containing a
    /// repository marker (`.git`, `.hg`, `.svn`).
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<PathBuf> {
        let mut current_dir = start_dir;

        loop {
            let config_path = current_dir.join(".cmsforge").join("config.toml");
            if config_path.is_file() {
                return Some(config_path);
            }

            if [".git", ".hg", ".svn"]
                .iter()
                .any(|marker| current_dir.join(marker).exists())
            {
                return None;
            }

            current_dir = current_dir.parent()?;
        }
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::DiscoveryFailed {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::InvalidFile(format!("{}: {}", path.display(), e.message())))
    }
}
