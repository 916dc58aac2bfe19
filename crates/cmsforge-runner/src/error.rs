//! Error types for subprocess execution

use thiserror::Error;

/// Failure of a streamed subprocess.
///
/// `ExitCode` and `Timeout` carry the retained tail of combined
/// stdout/stderr so the failing step can show what the tool printed last.
#[derive(Error, Debug)]
pub enum SubprocessError {
    #[error("failed to start '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("'{command}' {}{}", describe_exit(.code), format_tail(.tail))]
    ExitCode {
        command: String,
        code: Option<i32>,
        tail: Vec<String>,
    },

    #[error("'{command}' timed out after {seconds} seconds{}", format_tail(.tail))]
    Timeout {
        command: String,
        seconds: u64,
        tail: Vec<String>,
    },

    #[error("I/O error while running '{command}': {reason}")]
    Io { command: String, reason: String },
}

impl SubprocessError {
    /// Retained output lines, oldest first. Empty for spawn and I/O failures.
    #[must_use]
    pub fn tail(&self) -> &[String] {
        match self {
            Self::ExitCode { tail, .. } | Self::Timeout { tail, .. } => tail,
            Self::Spawn { .. } | Self::Io { .. } => &[],
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

fn format_tail(tail: &[String]) -> String {
    if tail.is_empty() {
        return String::new();
    }
    format!("; last output:\n{}", tail.join("\n"))
}
