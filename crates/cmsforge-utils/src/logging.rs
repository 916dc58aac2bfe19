//! Logging and observability for cmsforge
//!
//! Structured logging via `tracing`. Logs are written to stderr so that the
//! progress display on stdout is never torn by log lines.

use std::io::IsTerminal;
use std::time::Duration;
use tracing::{Level, error, info, span};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::redaction::redact_message;

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, compact
    #[default]
    Compact,
    /// One JSON object per line
    Json,
}

/// Check if colored output should be used.
///
/// Returns true only if stderr is a terminal and `NO_COLOR` is not set.
#[must_use]
pub fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("cmsforge=debug,warn")
            } else {
                EnvFilter::try_new("cmsforge=warn,error")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `verbose`. Fails if a subscriber is already
/// installed.
pub fn init_tracing(verbose: bool, format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = default_filter(verbose);

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .try_init()?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(use_color())
                        .with_target(verbose)
                        .with_thread_ids(false)
                        .with_line_number(false)
                        .with_file(false)
                        .compact(),
                )
                .try_init()?;
        }
    }

    Ok(())
}

/// Span covering one provisioning run
pub fn run_span(project: &str) -> tracing::Span {
    span!(Level::INFO, "provision_run", project = %project)
}

/// Span covering one step of a provisioning run (1-based index)
pub fn step_span(index: usize, label: &str) -> tracing::Span {
    span!(Level::INFO, "provision_step", step = index, label = %label)
}

pub fn log_step_start(index: usize, label: &str) {
    info!(step = index, label = %label, "Starting step");
}

pub fn log_step_complete(index: usize, label: &str, duration: Duration) {
    info!(
        step = index,
        label = %label,
        duration_ms = duration.as_millis() as u64,
        "Step completed"
    );
}

/// Log a step failure. The message is redacted before it reaches any sink.
pub fn log_step_error(index: usize, label: &str, message: &str, duration: Duration) {
    let sanitized = redact_message(message);
    error!(
        step = index,
        label = %label,
        duration_ms = duration.as_millis() as u64,
        error = %sanitized,
        "Step failed"
    );
}
