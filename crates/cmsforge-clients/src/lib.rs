//! Network collaborators for the provisioning orchestrator
//!
//! - [`RailwayClient`]: cloud platform over the Railway GraphQL API
//! - [`GitHubClient`]: source host over the GitHub REST API plus local `git`
//! - [`HttpProbe`]: readiness probe for the deployed application
//!
//! All three share one [`HttpClient`] so connections are pooled per process.

mod github;
mod http_client;
mod probe;
mod railway;
mod sealed;

#[cfg(test)]
mod test_server;

pub use github::GitHubClient;
pub use http_client::HttpClient;
pub use probe::HttpProbe;
pub use railway::RailwayClient;
