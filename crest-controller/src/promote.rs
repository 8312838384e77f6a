//! Promoter invocation
//!
//! The promoter is the external action that renders charts, pushes a
//! branch, opens the promotion pull request, and records its URL on the
//! activity. The controller treats it as a black box behind the
//! [`Promoter`] trait: [`CommandPromoter`] invokes an external binary and
//! [`FakePromoter`] records invocations for tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crest_client::{InMemoryStore, ResourceStore};
use crest_core::environment::Environment;
use crest_core::patch::{PromoteKey, PromotePatch};

/// One promotion of one application version into one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteRequest {
    pub application: String,
    pub environment: String,
    pub pipeline: String,
    pub build: String,
    pub version: String,
    pub helm_repository_url: String,
    pub local_helm_repo_name: String,
}

/// Deployment coordinates used when rebasing an existing promotion PR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub release_name: String,
    pub full_app_name: String,
    pub version: String,
}

/// The external promotion operations the controller invokes.
#[async_trait]
pub trait Promoter: Send + Sync {
    /// Opens a promotion pull request for the request, recording its URL
    /// on the pipeline activity.
    async fn promote(&self, request: &PromoteRequest) -> Result<()>;

    /// Re-creates or rebases the promotion pull request for an existing
    /// release, used when the open PR has conflicts.
    async fn promote_via_pull_request(
        &self,
        request: &PromoteRequest,
        environment: &Environment,
        release: &ReleaseInfo,
    ) -> Result<()>;

    /// Comments on the issues resolved by a completed promotion.
    async fn comment_on_issues(
        &self,
        request: &PromoteRequest,
        environment: &Environment,
    ) -> Result<()>;
}

/// Promoter that shells out to an external promote binary.
pub struct CommandPromoter {
    program: String,
}

impl CommandPromoter {
    /// Creates a promoter invoking the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn base_args(request: &PromoteRequest) -> Vec<String> {
        let mut args = vec![
            "--app".to_string(),
            request.application.clone(),
            "--env".to_string(),
            request.environment.clone(),
            "--pipeline".to_string(),
            request.pipeline.clone(),
            "--build".to_string(),
            request.build.clone(),
            "--version".to_string(),
            request.version.clone(),
            "--helm-repo-url".to_string(),
            request.helm_repository_url.clone(),
        ];
        if !request.local_helm_repo_name.is_empty() {
            args.push("--helm-repo-name".to_string());
            args.push(request.local_helm_repo_name.clone());
        }
        args
    }

    async fn run(&self, subcommand: &str, args: Vec<String>) -> Result<()> {
        debug!("Running {} {} {:?}", self.program, subcommand, args);
        let output = tokio::process::Command::new(&self.program)
            .arg(subcommand)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("Failed to execute '{} {subcommand}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} {subcommand} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Promoter for CommandPromoter {
    async fn promote(&self, request: &PromoteRequest) -> Result<()> {
        self.run("run", Self::base_args(request)).await
    }

    async fn promote_via_pull_request(
        &self,
        request: &PromoteRequest,
        _environment: &Environment,
        release: &ReleaseInfo,
    ) -> Result<()> {
        let mut args = Self::base_args(request);
        args.push("--release-name".to_string());
        args.push(release.release_name.clone());
        args.push("--full-app-name".to_string());
        args.push(release.full_app_name.clone());
        self.run("run", args).await
    }

    async fn comment_on_issues(
        &self,
        request: &PromoteRequest,
        _environment: &Environment,
    ) -> Result<()> {
        let args = vec![
            "--app".to_string(),
            request.application.clone(),
            "--env".to_string(),
            request.environment.clone(),
            "--version".to_string(),
            request.version.clone(),
        ];
        self.run("comment", args).await
    }
}

/// Promoter that records invocations in memory.
///
/// When constructed with a store it also emulates the real promoter's
/// side effect: each promotion patches the matching activity with a fresh
/// pull request URL, so driving the same activity twice is a no-op the
/// second time.
#[derive(Default)]
pub struct FakePromoter {
    store: Option<Arc<InMemoryStore>>,
    pr_base_url: String,
    next_pr_number: AtomicU32,
    promotions: Mutex<Vec<PromoteRequest>>,
    rebases: Mutex<Vec<(PromoteRequest, ReleaseInfo)>>,
    comments: Mutex<Vec<PromoteRequest>>,
    fail_promote: AtomicBool,
}

impl FakePromoter {
    /// Creates a promoter that only records invocations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a promoter that records invocations and patches the
    /// promoted activity in the given store.
    pub fn with_store(store: Arc<InMemoryStore>, pr_base_url: impl Into<String>) -> Self {
        Self {
            store: Some(store),
            pr_base_url: pr_base_url.into(),
            ..Default::default()
        }
    }

    /// Makes subsequent `promote` calls fail.
    pub fn fail_promote(&self, fail: bool) {
        self.fail_promote.store(fail, Ordering::SeqCst);
    }

    /// The promote requests received, in order.
    pub fn promotions(&self) -> Vec<PromoteRequest> {
        self.promotions.lock().unwrap().clone()
    }

    /// The rebase requests received, in order.
    pub fn rebases(&self) -> Vec<(PromoteRequest, ReleaseInfo)> {
        self.rebases.lock().unwrap().clone()
    }

    /// The comment-on-issues requests received, in order.
    pub fn comments(&self) -> Vec<PromoteRequest> {
        self.comments.lock().unwrap().clone()
    }

    async fn record_pull_request(&self, request: &PromoteRequest) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let activities = store
            .list_activities("")
            .await
            .context("Failed to list activities")?;
        let activity = activities
            .into_iter()
            .find(|a| a.spec.pipeline == request.pipeline && a.spec.build == request.build)
            .with_context(|| {
                format!(
                    "No activity for pipeline {} build {}",
                    request.pipeline, request.build
                )
            })?;

        let number = self.next_pr_number.fetch_add(1, Ordering::SeqCst) + 1;
        let url = format!(
            "{}/{}/pull/{}",
            self.pr_base_url, request.application, number
        );
        let key = PromoteKey::new(&activity.name, &request.environment);
        store
            .apply_promote_patch("", &key, PromotePatch::StartPullRequest {
                pull_request_url: url,
            })
            .await
            .context("Failed to record pull request on activity")?;
        Ok(())
    }
}

#[async_trait]
impl Promoter for FakePromoter {
    async fn promote(&self, request: &PromoteRequest) -> Result<()> {
        self.promotions.lock().unwrap().push(request.clone());
        if self.fail_promote.load(Ordering::SeqCst) {
            anyhow::bail!("promotion disabled");
        }
        info!(
            "Fake promotion of {} {} to environment {}",
            request.application, request.version, request.environment
        );
        self.record_pull_request(request).await
    }

    async fn promote_via_pull_request(
        &self,
        request: &PromoteRequest,
        _environment: &Environment,
        release: &ReleaseInfo,
    ) -> Result<()> {
        self.rebases
            .lock()
            .unwrap()
            .push((request.clone(), release.clone()));
        Ok(())
    }

    async fn comment_on_issues(
        &self,
        request: &PromoteRequest,
        _environment: &Environment,
    ) -> Result<()> {
        self.comments.lock().unwrap().push(request.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PromoteRequest {
        PromoteRequest {
            application: "acme-web".to_string(),
            environment: "staging".to_string(),
            pipeline: "acme/acme-web/master".to_string(),
            build: "7".to_string(),
            version: "1.2.3".to_string(),
            helm_repository_url: "http://chartmuseum:8080".to_string(),
            local_helm_repo_name: "releases".to_string(),
        }
    }

    #[test]
    fn test_command_promoter_args() {
        let args = CommandPromoter::base_args(&request());
        assert_eq!(args[0], "--app");
        assert_eq!(args[1], "acme-web");
        assert!(args.contains(&"--helm-repo-name".to_string()));
        assert!(args.contains(&"releases".to_string()));
    }

    #[test]
    fn test_command_promoter_omits_empty_repo_name() {
        let mut req = request();
        req.local_helm_repo_name = String::new();
        let args = CommandPromoter::base_args(&req);
        assert!(!args.contains(&"--helm-repo-name".to_string()));
    }

    #[tokio::test]
    async fn test_fake_promoter_records() {
        let promoter = FakePromoter::new();
        promoter.promote(&request()).await.unwrap();
        assert_eq!(promoter.promotions().len(), 1);

        promoter.fail_promote(true);
        assert!(promoter.promote(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_fake_promoter_patches_activity() {
        use crest_core::activity::{ActivitySpec, PipelineActivity};

        let store = Arc::new(InMemoryStore::new());
        store.upsert_activity(PipelineActivity {
            name: "acme-web-master-7".to_string(),
            spec: ActivitySpec {
                pipeline: "acme/acme-web/master".to_string(),
                build: "7".to_string(),
                ..Default::default()
            },
        });

        let promoter = FakePromoter::with_store(store.clone(), "https://git.example/acme");
        promoter.promote(&request()).await.unwrap();

        let activity = store.activity("acme-web-master-7").unwrap();
        let step = activity.promote_steps().next().unwrap();
        let pr = step.pull_request.as_ref().unwrap();
        assert_eq!(pr.pull_request_url, "https://git.example/acme/acme-web/pull/1");
    }
}
