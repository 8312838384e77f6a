//! Git provider trait and wire types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::urls::GitRepositoryInfo;

/// The Git-host operations the promotion controller consumes.
///
/// Implementations must be cheap to share; the controller holds one behind
/// an `Arc` for the lifetime of the process.
#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Fetches a pull request by number.
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &GitRepositoryInfo,
        number: u32,
    ) -> Result<PullRequest>;

    /// Lists the commit statuses reported for a commit, newest first.
    async fn list_commit_statuses(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Vec<CommitStatus>>;

    /// Returns the combined status of the pull request's last commit.
    async fn pull_request_last_commit_status(&self, pr: &PullRequest) -> Result<StatusState>;

    /// Merges a pull request with the given commit message.
    async fn merge_pull_request(&self, pr: &PullRequest, message: &str) -> Result<()>;
}

/// A pull request as seen by the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullRequest {
    pub url: String,
    pub owner: String,
    pub repo: String,
    pub number: u32,
    /// `open` or `closed`.
    pub state: String,
    pub merged: Option<bool>,
    pub merge_commit_sha: Option<String>,
    /// Absent while the host is still computing mergeability.
    pub mergeable: Option<bool>,
    pub last_commit_sha: String,
}

impl PullRequest {
    /// Whether the pull request has been closed (merged or not).
    pub fn is_closed(&self) -> bool {
        self.state == "closed"
    }
}

/// One commit status reported by a CI system or bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitStatus {
    /// API URL identifying the reporting check.
    pub url: String,
    /// Human-facing URL of the check run, possibly empty.
    #[serde(default)]
    pub target_url: String,
    pub state: StatusState,
    #[serde(default)]
    pub description: String,
}

impl CommitStatus {
    /// Whether this status reports a failure.
    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }
}

/// State of a commit status or combined status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusState {
    Pending,
    InProgress,
    Success,
    Error,
    Failure,
}

impl StatusState {
    /// Whether this state reports a failure.
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Error | Self::Failure)
    }
}

// Hosts report states beyond the ones the controller acts on; anything
// unrecognized degrades to pending instead of failing the poll.
impl<'de> serde::Deserialize<'de> for StatusState {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "in-progress" => Self::InProgress,
            "success" => Self::Success,
            "error" => Self::Error,
            "failure" => Self::Failure,
            _ => Self::Pending,
        })
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Success => "success",
            Self::Error => "error",
            Self::Failure => "failure",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_state_wire_names() {
        assert_eq!(
            serde_json::from_str::<StatusState>("\"in-progress\"").unwrap(),
            StatusState::InProgress
        );
        assert_eq!(
            serde_json::from_str::<StatusState>("\"success\"").unwrap(),
            StatusState::Success
        );
        // Unknown states degrade to pending rather than failing the poll.
        assert_eq!(
            serde_json::from_str::<StatusState>("\"queued\"").unwrap(),
            StatusState::Pending
        );
    }

    #[test]
    fn test_failed_states() {
        assert!(StatusState::Error.is_failed());
        assert!(StatusState::Failure.is_failed());
        assert!(!StatusState::Success.is_failed());
        assert!(!StatusState::InProgress.is_failed());
        assert!(!StatusState::Pending.is_failed());
    }

    #[test]
    fn test_pull_request_closed() {
        let pr = PullRequest {
            state: "closed".to_string(),
            ..Default::default()
        };
        assert!(pr.is_closed());
        let pr = PullRequest {
            state: "open".to_string(),
            ..Default::default()
        };
        assert!(!pr.is_closed());
    }
}
