//! Credential resolution
//!
//! Each token is looked up once at startup: environment variable, then the
//! user credential file, then an interactive prompt. Nothing below the CLI
//! reads the environment for credentials.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use cmsforge_utils::error::ConfigError;
use cmsforge_utils::redaction::mask_secret;

use super::ConfigSource;

pub const RAILWAY_TOKEN_ENV: &str = "RAILWAY_TOKEN";
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// A credential that never prints its value through `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for request headers only
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn masked(&self) -> String {
        mask_secret(&self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self.masked())
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Tokens for the cloud platform and the source host
#[derive(Debug, Clone)]
pub struct Credentials {
    pub railway_token: Secret,
    pub github_token: Secret,
    /// Where each token came from, keyed by `railway_token` / `github_token`
    pub sources: HashMap<String, ConfigSource>,
}

/// Asks the user for a missing credential.
pub trait Prompter {
    fn prompt_secret(&self, label: &str) -> std::io::Result<String>;
}

/// Reads a line from stdin after printing the label on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt_secret(&self, label: &str) -> std::io::Result<String> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{label}: ")?;
        stderr.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

/// `$CONFIG_DIR/cmsforge/credentials.toml`
#[must_use]
pub fn default_credentials_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cmsforge").join("credentials.toml"))
}

#[derive(Debug, Default, Deserialize)]
struct CredentialFile {
    railway_token: Option<String>,
    github_token: Option<String>,
}

impl CredentialFile {
    fn get(&self, key: &str) -> Option<&str> {
        match key {
            "railway_token" => self.railway_token.as_deref(),
            "github_token" => self.github_token.as_deref(),
            _ => None,
        }
    }
}

struct TokenSpec {
    key: &'static str,
    env_var: &'static str,
    prompt: &'static str,
}

const TOKENS: [TokenSpec; 2] = [
    TokenSpec {
        key: "railway_token",
        env_var: RAILWAY_TOKEN_ENV,
        prompt: "Railway API token",
    },
    TokenSpec {
        key: "github_token",
        env_var: GITHUB_TOKEN_ENV,
        prompt: "GitHub personal access token",
    },
];

/// Resolves [`Credentials`] with precedence env > credential file > prompt.
pub struct CredentialResolver<'a> {
    store_path: Option<PathBuf>,
    prompter: Option<&'a dyn Prompter>,
}

impl Default for CredentialResolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> CredentialResolver<'a> {
    /// Resolver using the default credential file and no prompt.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store_path: default_credentials_path(),
            prompter: None,
        }
    }

    #[must_use]
    pub fn with_store_path(mut self, path: Option<PathBuf>) -> Self {
        self.store_path = path;
        self
    }

    /// Enable interactive prompting for tokens that are still missing.
    #[must_use]
    pub fn with_prompter(mut self, prompter: &'a dyn Prompter) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn resolve(&self) -> Result<Credentials, ConfigError> {
        let file = match &self.store_path {
            Some(path) => load_credential_file(path)?,
            None => None,
        };

        let mut values: HashMap<&'static str, Secret> = HashMap::new();
        let mut sources = HashMap::new();

        for token in &TOKENS {
            let (value, source) = self.resolve_one(token, file.as_ref())?;
            tracing::debug!(key = token.key, source = %source, "Resolved credential");
            values.insert(token.key, value);
            sources.insert(token.key.to_string(), source);
        }

        let mut take = |key: &str| {
            values
                .remove(key)
                .ok_or_else(|| ConfigError::MissingRequired(key.to_string()))
        };
        Ok(Credentials {
            railway_token: take("railway_token")?,
            github_token: take("github_token")?,
            sources,
        })
    }

    fn resolve_one(
        &self,
        token: &TokenSpec,
        file: Option<&(PathBuf, CredentialFile)>,
    ) -> Result<(Secret, ConfigSource), ConfigError> {
        if let Some(value) = non_empty(std::env::var(token.env_var).ok().as_deref()) {
            return Ok((Secret::new(value), ConfigSource::Env));
        }

        if let Some((path, contents)) = file
            && let Some(value) = non_empty(contents.get(token.key))
        {
            return Ok((
                Secret::new(value),
                ConfigSource::CredentialFile(path.clone()),
            ));
        }

        if let Some(prompter) = self.prompter {
            let entered = prompter.prompt_secret(token.prompt).map_err(|e| {
                ConfigError::MissingRequired(format!("{} (prompt failed: {e})", token.key))
            })?;
            if let Some(value) = non_empty(Some(entered.as_str())) {
                return Ok((Secret::new(value), ConfigSource::Prompt));
            }
        }

        Err(ConfigError::MissingRequired(token.key.to_string()))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn load_credential_file(path: &Path) -> Result<Option<(PathBuf, CredentialFile)>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::CredentialStore {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
        }
    };

    let parsed: CredentialFile =
        toml::from_str(&content).map_err(|e| ConfigError::CredentialStore {
            path: path.display().to_string(),
            reason: e.message().to_string(),
        })?;
    Ok(Some((path.to_path_buf(), parsed)))
}
