//! Git URL parsing and pull-request URL transforms

use crate::error::{GitError, Result};

/// Coordinates of a repository on a Git host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRepositoryInfo {
    pub host: String,
    pub organisation: String,
    pub name: String,
}

impl GitRepositoryInfo {
    /// The HTTPS clone URL for this repository.
    pub fn https_url(&self) -> String {
        format!("https://{}/{}/{}", self.host, self.organisation, self.name)
    }
}

/// Parses a Git clone or browse URL into repository coordinates.
///
/// Accepts `https://host/org/name`, with or without a trailing `.git` or
/// `/`. Nested groups keep the first segment as the organisation and the
/// last as the repository name.
pub fn parse_git_url(git_url: &str) -> Result<GitRepositoryInfo> {
    let trimmed = git_url.trim().trim_end_matches('/');
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .ok_or_else(|| GitError::invalid_url(git_url, "missing scheme"))?;

    let mut segments = without_scheme.split('/');
    let host = segments
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GitError::invalid_url(git_url, "missing host"))?;
    let path: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();
    if path.len() < 2 {
        return Err(GitError::invalid_url(git_url, "expected owner and repository"));
    }

    let name = path[path.len() - 1].trim_end_matches(".git");
    if name.is_empty() {
        return Err(GitError::invalid_url(git_url, "empty repository name"));
    }
    Ok(GitRepositoryInfo {
        host: host.to_string(),
        organisation: path[0].to_string(),
        name: name.to_string(),
    })
}

/// Extracts the pull request number from the trailing path segment of a
/// pull request URL.
pub fn pull_request_number_from_url(pr_url: &str) -> Result<u32> {
    let last = pr_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    last.parse::<u32>().map_err(|_| {
        GitError::invalid_url(
            pr_url,
            format!("trailing segment {last:?} is not a pull request number"),
        )
    })
}

/// Derives the repository clone URL from a pull request URL by stripping
/// the last two path segments and appending `.git`.
///
/// This transform matches GitHub-style URL layouts
/// (`https://host/org/repo/pull/42`); providers with other layouts can
/// substitute their own transform before calling [`parse_git_url`].
pub fn repo_url_from_pull_request_url(pr_url: &str) -> Result<String> {
    let trimmed = pr_url.trim_end_matches('/');
    let without_number = trimmed
        .rsplit_once('/')
        .map(|(head, _)| head)
        .filter(|head| !head.is_empty())
        .ok_or_else(|| GitError::invalid_url(pr_url, "too few path segments"))?;
    let without_kind = without_number
        .rsplit_once('/')
        .map(|(head, _)| head)
        .filter(|head| !head.is_empty())
        .ok_or_else(|| GitError::invalid_url(pr_url, "too few path segments"))?;
    Ok(format!("{without_kind}.git"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_git_url() {
        let info = parse_git_url("https://git.example/acme/acme-web.git").unwrap();
        assert_eq!(info.host, "git.example");
        assert_eq!(info.organisation, "acme");
        assert_eq!(info.name, "acme-web");
        assert_eq!(info.https_url(), "https://git.example/acme/acme-web");
    }

    #[test]
    fn test_parse_git_url_trailing_slash() {
        let info = parse_git_url("https://git.example/acme/acme-web/").unwrap();
        assert_eq!(info.name, "acme-web");
    }

    #[test]
    fn test_parse_git_url_rejects_bad_urls() {
        assert!(parse_git_url("git.example/acme/acme-web").is_err());
        assert!(parse_git_url("https://git.example/acme").is_err());
        assert!(parse_git_url("https:///acme/acme-web").is_err());
    }

    #[test]
    fn test_pull_request_number() {
        assert_eq!(
            pull_request_number_from_url("https://git.example/acme/acme-web/pull/42").unwrap(),
            42
        );
        assert_eq!(
            pull_request_number_from_url("https://git.example/acme/acme-web/pull/42/").unwrap(),
            42
        );
        assert!(pull_request_number_from_url("https://git.example/acme/acme-web/pull").is_err());
    }

    #[test]
    fn test_repo_url_from_pull_request_url() {
        assert_eq!(
            repo_url_from_pull_request_url("https://git.example/acme/acme-web/pull/42").unwrap(),
            "https://git.example/acme/acme-web.git"
        );
    }

    #[test]
    fn test_repo_url_round_trips_through_parser() {
        let url =
            repo_url_from_pull_request_url("https://git.example/acme/acme-web/pull/42").unwrap();
        let info = parse_git_url(&url).unwrap();
        assert_eq!(info.organisation, "acme");
        assert_eq!(info.name, "acme-web");
    }
}
