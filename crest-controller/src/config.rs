//! Controller configuration
//!
//! Defines all configurable parameters for the workflow controller
//! including the watched namespace, helm repository coordinates, and the
//! pull-request poll interval.

use std::time::Duration;

/// Default interval between pull-request reconciliation passes.
pub const DEFAULT_PULL_REQUEST_POLL_TIME: Duration = Duration::from_secs(20);

/// Default name of the local helm repository that serves promoted charts.
pub const DEFAULT_LOCAL_HELM_REPO_NAME: &str = "releases";

/// Default URL of the chart museum the promoter resolves charts from.
pub const DEFAULT_HELM_REPOSITORY_URL: &str = "http://chartmuseum:8080";

/// Default development namespace watched for activities and workflows.
pub const DEFAULT_NAMESPACE: &str = "jx";

/// Workflow controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch for workflows and pipeline activities.
    pub namespace: String,

    /// Name of the helm repository that contains the promoted apps.
    pub local_helm_repo_name: String,

    /// URL of the chart repository passed to the promoter.
    pub helm_repository_url: String,

    /// Run one reconciliation pass over listed resources and exit.
    pub no_watch: bool,

    /// Never merge promotion pull requests, even with green statuses.
    pub no_merge_pull_request: bool,

    /// How often to poll open promotion pull requests.
    pub pull_request_poll_time: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            local_helm_repo_name: DEFAULT_LOCAL_HELM_REPO_NAME.to_string(),
            helm_repository_url: DEFAULT_HELM_REPOSITORY_URL.to_string(),
            no_watch: false,
            no_merge_pull_request: false,
            pull_request_poll_time: DEFAULT_PULL_REQUEST_POLL_TIME,
        }
    }
}

impl ControllerConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.namespace.is_empty() {
            anyhow::bail!("namespace cannot be empty");
        }

        if self.pull_request_poll_time.is_zero() {
            anyhow::bail!("pull_request_poll_time must be greater than 0");
        }

        Ok(())
    }

    /// Whether builds of this branch are eligible for promotion.
    ///
    /// Only exact `master` today; team-configurable branch patterns can
    /// slot in behind this method.
    pub fn is_release_branch(&self, branch: &str) -> bool {
        branch == "master"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.pull_request_poll_time, Duration::from_secs(20));
        assert_eq!(config.namespace, "jx");
        assert!(!config.no_watch);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ControllerConfig::default();
        assert!(config.validate().is_ok());

        config.namespace = String::new();
        assert!(config.validate().is_err());

        config.namespace = "jx".to_string();
        config.pull_request_poll_time = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_release_branches() {
        let config = ControllerConfig::default();
        assert!(config.is_release_branch("master"));
        assert!(!config.is_release_branch("feature/x"));
        assert!(!config.is_release_branch(""));
    }
}
