//! CLI entry point and dispatch logic
//!
//! `run()` parses arguments, installs logging, discovers configuration,
//! creates the tokio runtime and dispatches. It owns ALL error output.

use anyhow::Result;
use clap::Parser;

use cmsforge_config::Config;
use cmsforge_utils::logging::{LogFormat, init_tracing};
use cmsforge_utils::redaction::redact_message;
use cmsforge_utils::{CmsForgeError, ExitCode};

use super::args::{Cli, Commands};
use super::commands;

/// Main CLI execution function.
///
/// Returns `Err(ExitCode)` after the error has been printed; main.rs only maps
/// it to the process exit status.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    if let Err(e) = init_tracing(cli.verbose, format) {
        eprintln!("warning: logging unavailable: {e}");
    }

    let config = match Config::discover(&cli.config_overrides()) {
        Ok(config) => config,
        Err(err) => return Err(report(&CmsForgeError::from(err).into())),
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let result = rt.block_on(dispatch(cli.command, &config));
    result.map_err(|err| report(&err))
}

async fn dispatch(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::New {
            name,
            dir,
            skip_ci,
            non_interactive,
            schema,
            ..
        } => {
            let options = commands::new::NewOptions {
                name,
                dir,
                skip_ci,
                non_interactive,
                schema,
            };
            commands::new::execute(config, options).await
        }
        Commands::Config { json } => commands::config::execute(config, json),
        Commands::Probe {
            url,
            attempts,
            interval,
        } => commands::probe::execute(&url, attempts, interval).await,
    }
}

/// Print an error for the user and pick the exit code.
fn report(err: &anyhow::Error) -> ExitCode {
    if let Some(err) = err.downcast_ref::<CmsForgeError>() {
        eprint!("{}", err.display_for_user());
        return err.to_exit_code();
    }
    eprintln!("Error: {}", redact_message(&format!("{err:#}")));
    ExitCode::INTERNAL
}
