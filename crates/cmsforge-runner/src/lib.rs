//! Process execution for provisioning steps
//!
//! All process execution goes through [`CommandSpec`] to ensure argv-style
//! invocation. Long-running tools (package installs, `git push`, seed scripts)
//! are run through a [`SubprocessRunner`] so their output can be streamed line
//! by line to the progress display while a bounded tail is kept for errors.

pub mod command_spec;
pub mod error;
pub mod process;

pub use command_spec::CommandSpec;
pub use error::SubprocessError;
pub use process::{OutputCapture, StreamingRunner, SubprocessRunner};
