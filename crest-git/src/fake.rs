//! In-memory Git provider
//!
//! Backs controller tests and dry runs. Pull requests and commit statuses
//! are primed by the test; merges mutate the stored pull request so a
//! subsequent poll observes the merge, which is how the real host behaves.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{GitError, Result};
use crate::provider::{CommitStatus, GitProvider, PullRequest, StatusState};
use crate::urls::GitRepositoryInfo;

/// A Git provider that serves canned data from memory.
#[derive(Default)]
pub struct FakeGitProvider {
    pull_requests: Mutex<HashMap<(String, String, u32), PullRequest>>,
    commit_statuses: Mutex<HashMap<String, Vec<CommitStatus>>>,
    combined_statuses: Mutex<HashMap<String, StatusState>>,
    merged_urls: Mutex<Vec<String>>,
}

impl FakeGitProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Primes a pull request.
    pub fn add_pull_request(&self, pr: PullRequest) {
        let key = (pr.owner.clone(), pr.repo.clone(), pr.number);
        self.pull_requests.lock().unwrap().insert(key, pr);
    }

    /// Primes the statuses listed for a commit.
    pub fn set_commit_statuses(&self, sha: &str, statuses: Vec<CommitStatus>) {
        self.commit_statuses
            .lock()
            .unwrap()
            .insert(sha.to_string(), statuses);
    }

    /// Primes the combined status of a commit.
    pub fn set_combined_status(&self, sha: &str, state: StatusState) {
        self.combined_statuses
            .lock()
            .unwrap()
            .insert(sha.to_string(), state);
    }

    /// URLs of the pull requests merged through this provider, in order.
    pub fn merged_urls(&self) -> Vec<String> {
        self.merged_urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitProvider for FakeGitProvider {
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &GitRepositoryInfo,
        number: u32,
    ) -> Result<PullRequest> {
        let key = (owner.to_string(), repo.name.clone(), number);
        self.pull_requests
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| GitError::UnknownPullRequest(format!("{owner}/{}/{number}", repo.name)))
    }

    async fn list_commit_statuses(
        &self,
        _owner: &str,
        _repo: &str,
        sha: &str,
    ) -> Result<Vec<CommitStatus>> {
        Ok(self
            .commit_statuses
            .lock()
            .unwrap()
            .get(sha)
            .cloned()
            .unwrap_or_default())
    }

    async fn pull_request_last_commit_status(&self, pr: &PullRequest) -> Result<StatusState> {
        Ok(self
            .combined_statuses
            .lock()
            .unwrap()
            .get(&pr.last_commit_sha)
            .copied()
            .unwrap_or(StatusState::Pending))
    }

    async fn merge_pull_request(&self, pr: &PullRequest, _message: &str) -> Result<()> {
        let key = (pr.owner.clone(), pr.repo.clone(), pr.number);
        let mut pull_requests = self.pull_requests.lock().unwrap();
        let stored = pull_requests
            .get_mut(&key)
            .ok_or_else(|| GitError::UnknownPullRequest(pr.url.clone()))?;
        stored.merged = Some(true);
        if stored.merge_commit_sha.is_none() {
            stored.merge_commit_sha = Some(format!("merge-of-{}", stored.last_commit_sha));
        }
        self.merged_urls.lock().unwrap().push(pr.url.clone());
        Ok(())
    }
}
