use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use tokio::process::Command as TokioCommand;

use cmsforge_utils::redaction::redact_message;

/// Description of a command to execute.
///
/// Arguments are stored as discrete `OsString` elements and handed to the OS
/// as argv, never through `sh -c` or `cmd /C`. Project names and repository
/// URLs therefore cannot inject shell syntax.
///
/// # Example
///
/// ```rust
/// use cmsforge_runner::CommandSpec;
/// use std::ffi::OsString;
///
/// let cmd = CommandSpec::new("npm")
///     .arg("install")
///     .arg("--no-audit")
///     .cwd("/tmp/acme-site");
///
/// assert_eq!(cmd.program, OsString::from("npm"));
/// assert_eq!(cmd.args.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    /// The program to execute
    pub program: OsString,
    /// Arguments as discrete elements (NOT shell strings)
    pub args: Vec<OsString>,
    /// Optional working directory
    pub cwd: Option<PathBuf>,
    /// Environment overrides, applied on top of the inherited environment
    pub env: BTreeMap<OsString, OsString>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Add a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set an environment variable for the command.
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables for the command.
    #[must_use]
    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        for (key, value) in envs {
            self.env.insert(key.into(), value.into());
        }
        self
    }

    /// Program name as a lossy UTF-8 string, for messages.
    #[must_use]
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Convert into a `tokio::process::Command` using argv-style APIs only.
    ///
    /// Environment values are never rendered by [`fmt::Display`]; they may hold
    /// connection strings.
    #[must_use]
    pub fn to_tokio_command(&self) -> TokioCommand {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        cmd
    }
}

/// Renders `program arg1 arg2` with credentials in URLs redacted.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut line = self.program_name();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        f.write_str(&redact_message(&line))
    }
}
