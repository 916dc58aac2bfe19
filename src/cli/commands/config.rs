//! `cmsforge config`: effective configuration with per-key sources

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

use cmsforge_config::{Config, CredentialResolver, Credentials};

#[derive(Debug, Serialize, PartialEq, Eq)]
struct Entry {
    value: String,
    source: String,
}

#[derive(Debug, Serialize)]
struct ConfigReport {
    config_path: Option<String>,
    values: BTreeMap<String, Entry>,
}

pub fn execute(config: &Config, json: bool) -> Result<()> {
    let credentials = CredentialResolver::new().resolve();
    if let Err(e) = &credentials {
        tracing::debug!(error = %e, "Credentials incomplete");
    }
    let report = build_report(config, credentials.ok().as_ref());

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match &report.config_path {
        Some(path) => println!("Config file: {path}"),
        None => println!("Config file: (none found)"),
    }
    let width = report.values.keys().map(String::len).max().unwrap_or(0);
    for (key, entry) in &report.values {
        println!("  {key:<width$}  {}  [{}]", entry.value, entry.source);
    }
    Ok(())
}

/// Tokens only ever appear masked.
fn build_report(config: &Config, credentials: Option<&Credentials>) -> ConfigReport {
    let mut values: BTreeMap<String, Entry> = config
        .effective_config()
        .into_iter()
        .map(|(key, (value, source))| (key, Entry { value, source }))
        .collect();

    for key in ["railway_token", "github_token"] {
        let entry = match credentials {
            Some(creds) => {
                let secret = if key == "railway_token" {
                    &creds.railway_token
                } else {
                    &creds.github_token
                };
                Entry {
                    value: secret.masked(),
                    source: creds
                        .sources
                        .get(key)
                        .map_or_else(|| "unknown".to_string(), ToString::to_string),
                }
            }
            None => Entry {
                value: "(not set)".to_string(),
                source: "-".to_string(),
            },
        };
        values.insert(key.to_string(), entry);
    }

    ConfigReport {
        config_path: config.config_path.as_ref().map(|p| p.display().to_string()),
        values,
    }
}
