//! Configuration for cmsforge
//!
//! Plain settings resolve with precedence CLI > config file > defaults and keep
//! per-key source attribution. Credentials resolve separately: environment,
//! then the user credential file, then an interactive prompt.

mod cli_args;
mod credentials;
mod discovery;
mod model;
mod provision;
mod sources;
pub mod validation;

pub use cli_args::CliArgs;
pub use credentials::{
    CredentialResolver, Credentials, Prompter, Secret, StdinPrompter, default_credentials_path,
};
pub use model::{
    CommandSettings, Config, ConfigSource, DeploySettings, PollingSettings, ProjectSettings,
};
pub use provision::{PollSettings, ProvisionConfig, ProvisionRequest};
