use std::collections::BTreeMap;

use super::Config;
use super::model::{
    DEFAULT_CI_ATTEMPTS, DEFAULT_CI_INITIAL_DELAY_SECS, DEFAULT_CI_INTERVAL_SECS,
    DEFAULT_SERVICE_ATTEMPTS, DEFAULT_SERVICE_INITIAL_DELAY_SECS, DEFAULT_SERVICE_INTERVAL_SECS,
};

impl Config {
    /// Effective configuration as `key -> (value, source)`, sorted by key.
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let mut config = BTreeMap::new();

        let mut add = |key: &str, value: String| {
            let source = self.source_of(key).to_string();
            config.insert(key.to_string(), (value, source));
        };

        add(
            "owner",
            self.project
                .owner
                .clone()
                .unwrap_or_else(|| "(token owner)".to_string()),
        );
        add("public", self.public_repo().to_string());
        add("branch", self.branch().to_string());
        add("health_path", self.health_path().to_string());

        let polling = &self.polling;
        add(
            "service_attempts",
            polling
                .service_attempts
                .unwrap_or(DEFAULT_SERVICE_ATTEMPTS)
                .to_string(),
        );
        add(
            "service_interval_secs",
            polling
                .service_interval_secs
                .unwrap_or(DEFAULT_SERVICE_INTERVAL_SECS)
                .to_string(),
        );
        add(
            "service_initial_delay_secs",
            polling
                .service_initial_delay_secs
                .unwrap_or(DEFAULT_SERVICE_INITIAL_DELAY_SECS)
                .to_string(),
        );
        add(
            "ci_attempts",
            polling.ci_attempts.unwrap_or(DEFAULT_CI_ATTEMPTS).to_string(),
        );
        add(
            "ci_interval_secs",
            polling
                .ci_interval_secs
                .unwrap_or(DEFAULT_CI_INTERVAL_SECS)
                .to_string(),
        );
        add(
            "ci_initial_delay_secs",
            polling
                .ci_initial_delay_secs
                .unwrap_or(DEFAULT_CI_INITIAL_DELAY_SECS)
                .to_string(),
        );

        add("install", self.install_command().join(" "));
        add("seed", self.seed_command().join(" "));
        add("timeout_secs", self.subprocess_timeout_secs().to_string());

        config
    }
}
