use std::path::PathBuf;

/// Configuration overrides supplied on the command line.
///
/// The CLI layer fills this from clap arguments; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Explicit configuration file, disables discovery
    pub config_path: Option<PathBuf>,
    pub owner: Option<String>,
    pub public: Option<bool>,
    pub branch: Option<String>,
    pub health_path: Option<String>,
    pub service_attempts: Option<u32>,
    pub service_interval_secs: Option<u64>,
}
