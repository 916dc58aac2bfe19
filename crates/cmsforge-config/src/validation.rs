use cmsforge_utils::error::ConfigError;

use super::Config;

/// Longest project name accepted; repository and service names derive from it.
pub const MAX_PROJECT_NAME_LEN: usize = 64;

/// Check that `name` is usable as a repository, service and directory name.
///
/// Accepts lowercase ASCII letters, digits and single dashes, starting with a
/// letter and not ending with a dash.
pub fn check_project_slug(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name must not be empty");
    }
    if name.len() > MAX_PROJECT_NAME_LEN {
        return Err("name must be at most 64 characters");
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err("name must start with a lowercase letter");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("only lowercase letters, digits and '-' are allowed");
    }
    if name.ends_with('-') || name.contains("--") {
        return Err("dashes must separate words");
    }
    Ok(())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn check_attempts(key: &str, value: Option<u32>) -> Result<(), ConfigError> {
    match value {
        Some(0) => Err(invalid(key, "must be greater than 0")),
        Some(n) if n > 1_000 => Err(invalid(key, "exceeds maximum of 1000 attempts")),
        _ => Ok(()),
    }
}

fn check_interval(key: &str, value: Option<u64>) -> Result<(), ConfigError> {
    match value {
        Some(0) => Err(invalid(key, "must be at least 1 second")),
        Some(n) if n > 600 => Err(invalid(key, "exceeds maximum of 600 seconds")),
        _ => Ok(()),
    }
}

impl Config {
    /// Validate configuration values
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let polling = &self.polling;
        check_attempts("service_attempts", polling.service_attempts)?;
        check_attempts("ci_attempts", polling.ci_attempts)?;
        check_interval("service_interval_secs", polling.service_interval_secs)?;
        check_interval("ci_interval_secs", polling.ci_interval_secs)?;

        for (key, delay) in [
            ("service_initial_delay_secs", polling.service_initial_delay_secs),
            ("ci_initial_delay_secs", polling.ci_initial_delay_secs),
        ] {
            if delay.is_some_and(|d| d > 3_600) {
                return Err(invalid(key, "exceeds maximum of 3600 seconds"));
            }
        }

        if let Some(path) = &self.deploy.health_path
            && !path.starts_with('/')
        {
            return Err(invalid("health_path", path));
        }

        if let Some(branch) = &self.project.branch
            && (branch.is_empty() || branch.contains(char::is_whitespace))
        {
            return Err(invalid("branch", branch));
        }

        if let Some(owner) = &self.project.owner
            && (owner.is_empty() || owner.contains('/'))
        {
            return Err(invalid("owner", owner));
        }

        for (key, argv) in [
            ("commands.install", &self.commands.install),
            ("commands.seed", &self.commands.seed),
        ] {
            if let Some(argv) = argv
                && argv.first().is_none_or(|program| program.trim().is_empty())
            {
                return Err(invalid(key, "must name a program as the first element"));
            }
        }

        if self.commands.timeout_secs == Some(0) {
            return Err(invalid("commands.timeout_secs", "must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_slugs() {
        for name in ["acme", "acme-site", "site2", "a1-b2-c3"] {
            assert!(check_project_slug(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_invalid_slugs() {
        for name in ["", "Acme", "1site", "acme_site", "acme-", "acme--site", "acme site"] {
            assert!(check_project_slug(name).is_err(), "{name}");
        }
        assert!(check_project_slug(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default();
        config.polling.ci_attempts = Some(0);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ci_attempts"));
    }

    #[test]
    fn test_interval_bounds() {
        let mut config = Config::default();
        config.polling.service_interval_secs = Some(601);
        assert!(config.validate().is_err());
        config.polling.service_interval_secs = Some(600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_health_path_must_be_absolute() {
        let mut config = Config::default();
        config.deploy.health_path = Some("health".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "health_path"));
    }

    #[test]
    fn test_empty_install_command_rejected() {
        let mut config = Config::default();
        config.commands.install = Some(Vec::new());
        assert!(config.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_accepted_slugs_are_charset_clean(name in "[a-z0-9_-]{0,70}") {
            if check_project_slug(&name).is_ok() {
                prop_assert!(name.len() <= MAX_PROJECT_NAME_LEN);
                prop_assert!(!name.contains('_'));
                prop_assert!(!name.ends_with('-'));
            }
        }
    }
}
