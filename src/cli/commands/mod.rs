//! Subcommand implementations

pub(super) mod config;
pub(super) mod new;
pub(super) mod probe;
