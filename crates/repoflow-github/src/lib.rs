//! GitHub collaborator for repoflow.
//!
//! [`GitHubHost`] implements [`repoflow_core::VcsHost`]: comments, merges
//! and pull request metadata go through the REST API ([`GitHubClient`]);
//! checkouts and commands run locally through git and `sh`
//! ([`ProcessRunner`]).

pub mod client;
pub mod config;
pub mod host;
pub mod process;

pub use client::GitHubClient;
pub use config::GitHubConfig;
pub use host::GitHubHost;
pub use process::ProcessRunner;
