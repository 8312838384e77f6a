//! Crest Git Provider Client
//!
//! A type-safe client for the Git-host operations the promotion controller
//! needs: reading pull requests, listing commit statuses, and merging
//! promotion pull requests.
//!
//! The [`GitProvider`] trait pins the surface; [`HttpGitProvider`] talks to
//! a GitHub-compatible REST API and [`FakeGitProvider`] backs tests and
//! dry runs.

pub mod error;
mod fake;
mod http;
mod provider;
mod urls;

pub use error::{GitError, Result};
pub use fake::FakeGitProvider;
pub use http::HttpGitProvider;
pub use provider::{CommitStatus, GitProvider, PullRequest, StatusState};
pub use urls::{
    parse_git_url, pull_request_number_from_url, repo_url_from_pull_request_url,
    GitRepositoryInfo,
};
