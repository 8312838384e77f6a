//! HTTP Git provider
//!
//! Talks to a GitHub-compatible REST API. Only the handful of endpoints
//! the controller needs are implemented.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{GitError, Result};
use crate::provider::{CommitStatus, GitProvider, PullRequest, StatusState};
use crate::urls::GitRepositoryInfo;

const USER_AGENT: &str = concat!("crest/", env!("CARGO_PKG_VERSION"));

/// Git provider backed by a GitHub-compatible REST API.
#[derive(Debug, Clone)]
pub struct HttpGitProvider {
    /// Base API URL (e.g. "https://api.github.com").
    base_url: String,
    /// Access token, sent as a `token` authorization header when present.
    token: Option<String>,
    client: Client,
}

impl HttpGitProvider {
    /// Create a new provider for the given API base URL.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: Client::new(),
        }
    }

    /// Get the base API URL of the provider.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(url))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(reqwest::header::USER_AGENT, USER_AGENT);
        match &self.token {
            Some(token) => request.header(reqwest::header::AUTHORIZATION, format!("token {token}")),
            None => request,
        }
    }

    /// Handle an API response and deserialize JSON.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GitError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| GitError::ParseError(format!("Failed to parse JSON response: {e}")))
    }

    /// Handle an API response whose body the caller does not need.
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GitError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl GitProvider for HttpGitProvider {
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &GitRepositoryInfo,
        number: u32,
    ) -> Result<PullRequest> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            self.base_url, owner, repo.name, number
        );
        let response = self.get(&url).send().await?;
        let wire: WirePullRequest = self.handle_response(response).await?;

        Ok(PullRequest {
            url: wire.html_url,
            owner: owner.to_string(),
            repo: repo.name.clone(),
            number: wire.number,
            state: wire.state,
            merged: wire.merged,
            merge_commit_sha: wire.merge_commit_sha,
            mergeable: wire.mergeable,
            last_commit_sha: wire.head.map(|head| head.sha).unwrap_or_default(),
        })
    }

    async fn list_commit_statuses(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Vec<CommitStatus>> {
        let url = format!(
            "{}/repos/{}/{}/commits/{}/statuses",
            self.base_url, owner, repo, sha
        );
        let response = self.get(&url).send().await?;
        self.handle_response(response).await
    }

    async fn pull_request_last_commit_status(&self, pr: &PullRequest) -> Result<StatusState> {
        let url = format!(
            "{}/repos/{}/{}/commits/{}/status",
            self.base_url, pr.owner, pr.repo, pr.last_commit_sha
        );
        let response = self.get(&url).send().await?;
        let combined: WireCombinedStatus = self.handle_response(response).await?;
        Ok(combined.state)
    }

    async fn merge_pull_request(&self, pr: &PullRequest, message: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/merge",
            self.base_url, pr.owner, pr.repo, pr.number
        );
        let request = self.authorize(self.client.put(&url)).json(&WireMergeRequest {
            commit_message: message.to_string(),
        });
        let response = request.send().await?;
        self.handle_empty_response(response).await
    }
}

#[derive(Debug, Deserialize)]
struct WirePullRequest {
    #[serde(default)]
    html_url: String,
    number: u32,
    state: String,
    merged: Option<bool>,
    merge_commit_sha: Option<String>,
    mergeable: Option<bool>,
    head: Option<WireCommitRef>,
}

#[derive(Debug, Deserialize)]
struct WireCommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct WireCombinedStatus {
    state: StatusState,
}

#[derive(Debug, Serialize)]
struct WireMergeRequest {
    commit_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_trims_trailing_slash() {
        let provider = HttpGitProvider::new("https://api.git.example/", None);
        assert_eq!(provider.base_url(), "https://api.git.example");
    }

    #[test]
    fn test_wire_pull_request_decoding() {
        let json = r#"{
            "html_url": "https://git.example/acme/acme-web/pull/42",
            "number": 42,
            "state": "open",
            "merged": false,
            "merge_commit_sha": null,
            "mergeable": true,
            "head": {"sha": "abc123"}
        }"#;
        let wire: WirePullRequest = serde_json::from_str(json).unwrap();
        assert_eq!(wire.number, 42);
        assert_eq!(wire.state, "open");
        assert_eq!(wire.mergeable, Some(true));
        assert_eq!(wire.head.unwrap().sha, "abc123");
    }
}
