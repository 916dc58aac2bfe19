//! Command-line interface for cmsforge
//!
//! ## Module Structure
//!
//! - `args`: CLI argument definitions (clap)
//! - `run`: entry point, logging and configuration setup, dispatch
//! - `commands`: one module per subcommand

pub mod args;
mod commands;
mod run;

pub use args::{Cli, Commands, build_cli};
pub use run::run;
