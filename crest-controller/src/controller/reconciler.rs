//! Pull-request reconciler
//!
//! Periodically polls the Git host for every pending promotion pull
//! request and advances the per-step state machine:
//! `pull-request -> update -> completed`.
//!
//! Each transition is applied at most once per poll. Failures are isolated
//! per activity and per step; whatever could not be advanced this tick is
//! re-examined on the next one.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crest_core::activity::{GitStatus, PipelineActivity, PromoteActivityStep};
use crest_core::environment::Environment;
use crest_core::patch::{PromoteKey, PromotePatch};
use crest_git::{
    parse_git_url, pull_request_number_from_url, repo_url_from_pull_request_url, PullRequest,
    StatusState,
};

use super::WorkflowController;
use crate::promote::ReleaseInfo;

impl WorkflowController {
    /// Polls all pending activities for pull-request progress.
    ///
    /// Iterates a snapshot of the pending set so watch events arriving
    /// mid-scan cannot skip entries; additions land in the next scan.
    pub(super) async fn check_pull_requests(&self) {
        debug!("Polling to see if any pull requests have merged");
        let snapshot: Vec<PipelineActivity> = self.pipeline_map.values().cloned().collect();
        for activity in &snapshot {
            self.check_activity_pull_requests(activity).await;
        }
    }

    /// Polls the open promotion pull requests of one activity.
    pub(super) async fn check_activity_pull_requests(&self, activity: &PipelineActivity) {
        if !self.config.is_release_branch(activity.branch_name()) {
            return;
        }

        for promote in activity.promote_steps() {
            if promote.status.is_terminated() {
                continue;
            }
            self.reconcile_promotion(activity, promote).await;
        }
    }

    /// Advances one promote step through its state machine.
    async fn reconcile_promotion(&self, activity: &PipelineActivity, promote: &PromoteActivityStep) {
        let env_name = promote.environment.as_str();
        let Some(pr_step) = promote.pull_request.as_ref() else {
            return;
        };
        let pr_url = pr_step.pull_request_url.as_str();
        if pr_url.is_empty() || env_name.is_empty() {
            return;
        }

        let number = match pull_request_number_from_url(pr_url) {
            Ok(number) => number,
            Err(e) => {
                warn!("Failed to get PR number: {}", e);
                return;
            }
        };
        let repo_url = match repo_url_from_pull_request_url(pr_url) {
            Ok(url) => url,
            Err(e) => {
                warn!("Failed to derive repository from PR URL {}: {}", pr_url, e);
                return;
            }
        };
        let repo = match parse_git_url(&repo_url) {
            Ok(info) => info,
            Err(e) => {
                warn!("Failed to parse git URL {}: {}", repo_url, e);
                return;
            }
        };

        let pr = match self
            .git
            .get_pull_request(&repo.organisation, &repo, number)
            .await
        {
            Ok(pr) => pr,
            Err(e) => {
                warn!(
                    "Failed to query the pull request status on pipeline {} for repo {} PR {}: {}",
                    activity.name,
                    repo.https_url(),
                    pr_url,
                    e
                );
                return;
            }
        };

        info!(
            "Pipeline {} promote environment {} has PR {}",
            activity.name, env_name, pr_url
        );

        if pr.merged == Some(true) {
            if let Some(sha) = pr.merge_commit_sha.clone() {
                self.handle_merged_pull_request(activity, promote, &pr, &sha)
                    .await;
            }
            return;
        }

        if pr.is_closed() {
            warn!("Pull request {} is closed", pr.url);
            // TODO decide whether a closed PR should fail the promote step
            return;
        }

        // Still open: merge once the last commit is green.
        match self.git.pull_request_last_commit_status(&pr).await {
            Err(e) => {
                warn!(
                    "Failed to query the pull request last commit status for {} ref {}: {}",
                    pr.url, pr.last_commit_sha, e
                );
            }
            Ok(StatusState::InProgress) => {
                info!("The build for the pull request last commit is currently in progress");
                return;
            }
            Ok(StatusState::Success) => {
                if !self.config.no_merge_pull_request {
                    if let Err(e) = self
                        .git
                        .merge_pull_request(&pr, "promote: automatically merged promotion PR")
                        .await
                    {
                        warn!("Failed to merge the pull request {}: {}", pr.url, e);
                    }
                }
            }
            Ok(state @ (StatusState::Error | StatusState::Failure)) => {
                warn!(
                    "Pull request {} last commit has status {} for ref {}",
                    pr.url, state, pr.last_commit_sha
                );
                return;
            }
            Ok(_) => {}
        }

        if pr.mergeable == Some(false) {
            info!("Rebasing pull request {} due to conflict", pr.url);
            self.rebase_pull_request(activity, env_name).await;
        }
    }

    /// Records a merged pull request on the activity and completes the
    /// update once every commit status on the merge commit is green.
    async fn handle_merged_pull_request(
        &self,
        activity: &PipelineActivity,
        promote: &PromoteActivityStep,
        pr: &PullRequest,
        merge_sha: &str,
    ) {
        let env_name = promote.environment.as_str();
        let namespace = self.config.namespace.as_str();
        let key = PromoteKey::new(&activity.name, env_name);

        let pull_request_done = promote
            .pull_request
            .as_ref()
            .is_some_and(|p| p.status.is_terminated() && !p.merge_commit_sha.is_empty());
        if !pull_request_done {
            let patch = PromotePatch::CompletePullRequest {
                merge_commit_sha: merge_sha.to_string(),
            };
            if let Err(e) = self.store.apply_promote_patch(namespace, &key, patch).await {
                warn!(
                    "Failed to complete the pull request step on pipeline {}: {}",
                    activity.name, e
                );
                return;
            }
        }

        let update_started = promote
            .update
            .as_ref()
            .is_some_and(|u| u.started_timestamp.is_some());
        if !update_started {
            if let Err(e) = self
                .store
                .apply_promote_patch(namespace, &key, PromotePatch::StartUpdate)
                .await
            {
                warn!(
                    "Failed to start the update step on pipeline {}: {}",
                    activity.name, e
                );
                return;
            }
        }

        let statuses = match self
            .git
            .list_commit_statuses(&pr.owner, &pr.repo, merge_sha)
            .await
        {
            Ok(statuses) => statuses,
            Err(e) => {
                warn!("Failed to list commit statuses for {}: {}", merge_sha, e);
                return;
            }
        };
        if statuses.is_empty() {
            return;
        }

        // Merge per-URL: a success is never overwritten, any other change
        // of state replaces the entry and records its target URL.
        let mut url_status_map: BTreeMap<String, (StatusState, String)> = BTreeMap::new();
        for status in &statuses {
            if status.is_failed() {
                warn!(
                    "merge status: {} URL: {} description: {}",
                    status.state, status.target_url, status.description
                );
                return;
            }
            let replace = match url_status_map.get(&status.url) {
                Some((existing, _)) => {
                    *existing != StatusState::Success && *existing != status.state
                }
                None => true,
            };
            if replace {
                url_status_map.insert(status.url.clone(), (status.state, status.target_url.clone()));
            }
        }

        let recorded: Vec<GitStatus> = url_status_map
            .iter()
            .map(|(url, (state, target_url))| GitStatus {
                url: if target_url.is_empty() {
                    url.clone()
                } else {
                    target_url.clone()
                },
                status: state.to_string(),
            })
            .collect();

        let already_recorded = promote
            .update
            .as_ref()
            .is_some_and(|u| u.statuses == recorded);
        if !already_recorded {
            let patch = PromotePatch::SetUpdateStatuses {
                statuses: recorded,
            };
            if let Err(e) = self.store.apply_promote_patch(namespace, &key, patch).await {
                warn!(
                    "Failed to record update statuses on pipeline {}: {}",
                    activity.name, e
                );
                return;
            }
        }

        let succeeded = url_status_map
            .values()
            .all(|(state, _)| *state == StatusState::Success);
        if !succeeded {
            return;
        }

        if activity.spec.git_url.is_empty() {
            warn!(
                "No git URL for pipeline activity {} so cannot comment on issues",
                activity.name
            );
            return;
        }
        let environment = match self.store.get_environment(namespace, env_name).await {
            Ok(environment) => environment,
            Err(e) => {
                warn!("Failed to find environment {}: {}", env_name, e);
                return;
            }
        };
        let request = self.promote_request(activity, env_name);
        if let Err(e) = self.promoter.comment_on_issues(&request, &environment).await {
            warn!("Failed to comment on issues: {:#}", e);
            return;
        }

        if let Err(e) = self
            .store
            .apply_promote_patch(namespace, &key, PromotePatch::CompleteUpdate)
            .await
        {
            warn!(
                "Failed to update pipeline activity on promotion completion: {}",
                e
            );
        }
    }

    /// Asks the promoter to rebase the conflicted promotion pull request.
    async fn rebase_pull_request(&self, activity: &PipelineActivity, env_name: &str) {
        let environment = match self
            .store
            .get_environment(&self.config.namespace, env_name)
            .await
        {
            Ok(environment) => environment,
            Err(e) => {
                warn!("Failed to find environment {}: {}", env_name, e);
                return;
            }
        };
        let Some(release) = self.release_info(activity, &environment) else {
            return;
        };
        let request = self.promote_request(activity, env_name);
        if let Err(e) = self
            .promoter
            .promote_via_pull_request(&request, &environment, &release)
            .await
        {
            warn!(
                "Failed to rebase promotion pull request for {} in environment {}: {:#}",
                activity.name, env_name, e
            );
        }
    }

    /// Deployment coordinates of the release an open promotion targets.
    fn release_info(
        &self,
        activity: &PipelineActivity,
        environment: &Environment,
    ) -> Option<ReleaseInfo> {
        let app = activity.repository_name();
        if app.is_empty() {
            return None;
        }
        let full_app_name = if self.config.local_helm_repo_name.is_empty() {
            app.to_string()
        } else {
            format!("{}/{}", self.config.local_helm_repo_name, app)
        };
        Some(ReleaseInfo {
            release_name: format!("{}-{}", environment.spec.namespace, app),
            full_app_name,
            version: activity.spec.version.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crest_client::InMemoryStore;
    use crest_core::activity::{
        ActivitySpec, ActivityStatus, ActivityStep, PromotePullRequestStep,
    };
    use crest_core::environment::EnvironmentSpec;
    use crest_git::{CommitStatus, FakeGitProvider};

    use crate::config::ControllerConfig;
    use crate::promote::FakePromoter;
    use crate::WorkflowController;

    const PR_URL: &str = "https://git.example/acme/acme-web/pull/42";

    fn pending_activity() -> PipelineActivity {
        PipelineActivity {
            name: "acme-web-master-7".to_string(),
            spec: ActivitySpec {
                pipeline: "acme/acme-web/master".to_string(),
                build: "7".to_string(),
                version: "1.2.3".to_string(),
                workflow_status: ActivityStatus::Running,
                git_url: "https://git.example/acme/acme-web.git".to_string(),
                steps: vec![ActivityStep::Promote(PromoteActivityStep {
                    environment: "staging".to_string(),
                    status: ActivityStatus::Running,
                    pull_request: Some(PromotePullRequestStep {
                        status: ActivityStatus::Running,
                        pull_request_url: PR_URL.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                })],
                ..Default::default()
            },
        }
    }

    fn staging_environment() -> Environment {
        Environment {
            name: "staging".to_string(),
            spec: EnvironmentSpec {
                namespace: "staging-ns".to_string(),
                ..Default::default()
            },
        }
    }

    fn open_pull_request() -> PullRequest {
        PullRequest {
            url: PR_URL.to_string(),
            owner: "acme".to_string(),
            repo: "acme-web".to_string(),
            number: 42,
            state: "open".to_string(),
            merged: Some(false),
            merge_commit_sha: None,
            mergeable: Some(true),
            last_commit_sha: "head1".to_string(),
        }
    }

    fn merged_pull_request(sha: &str) -> PullRequest {
        PullRequest {
            merged: Some(true),
            merge_commit_sha: Some(sha.to_string()),
            ..open_pull_request()
        }
    }

    fn success_status(url: &str, target_url: &str) -> CommitStatus {
        CommitStatus {
            url: url.to_string(),
            target_url: target_url.to_string(),
            state: StatusState::Success,
            description: String::new(),
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        git: Arc<FakeGitProvider>,
        promoter: Arc<FakePromoter>,
        controller: WorkflowController,
    }

    fn fixture(config: ControllerConfig) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let git = Arc::new(FakeGitProvider::new());
        let promoter = Arc::new(FakePromoter::new());
        store.add_environment(staging_environment());
        let controller =
            WorkflowController::new(config, store.clone(), git.clone(), promoter.clone());
        Fixture {
            store,
            git,
            promoter,
            controller,
        }
    }

    fn patch_ops(fixture: &Fixture) -> Vec<PromotePatch> {
        fixture
            .store
            .applied_patches()
            .into_iter()
            .map(|(_, patch)| patch)
            .collect()
    }

    #[tokio::test]
    async fn test_merged_pull_request_completes_promotion() {
        let f = fixture(ControllerConfig::default());
        let activity = pending_activity();
        f.store.upsert_activity(activity.clone());
        f.git.add_pull_request(merged_pull_request("abc"));
        f.git.set_commit_statuses(
            "abc",
            vec![
                success_status("ci", "ci-link"),
                success_status("scan", ""),
            ],
        );

        f.controller.check_activity_pull_requests(&activity).await;

        let patches = patch_ops(&f);
        assert_eq!(
            patches,
            vec![
                PromotePatch::CompletePullRequest {
                    merge_commit_sha: "abc".to_string(),
                },
                PromotePatch::StartUpdate,
                PromotePatch::SetUpdateStatuses {
                    statuses: vec![
                        GitStatus {
                            url: "ci-link".to_string(),
                            status: "success".to_string(),
                        },
                        GitStatus {
                            url: "scan".to_string(),
                            status: "success".to_string(),
                        },
                    ],
                },
                PromotePatch::CompleteUpdate,
            ]
        );
        assert_eq!(f.promoter.comments().len(), 1);

        let stored = f.store.activity("acme-web-master-7").unwrap();
        let step = stored.promote_steps().next().unwrap();
        assert_eq!(step.status, ActivityStatus::Succeeded);
        assert_eq!(
            step.pull_request.as_ref().unwrap().merge_commit_sha,
            "abc"
        );
    }

    #[tokio::test]
    async fn test_failing_commit_status_blocks_completion() {
        let f = fixture(ControllerConfig::default());
        let activity = pending_activity();
        f.store.upsert_activity(activity.clone());
        f.git.add_pull_request(merged_pull_request("abc"));
        f.git.set_commit_statuses(
            "abc",
            vec![
                success_status("ci", "ci-link"),
                CommitStatus {
                    url: "scan".to_string(),
                    target_url: "x".to_string(),
                    state: StatusState::Failure,
                    description: "scan failed".to_string(),
                },
            ],
        );

        f.controller.check_activity_pull_requests(&activity).await;

        assert_eq!(
            patch_ops(&f),
            vec![
                PromotePatch::CompletePullRequest {
                    merge_commit_sha: "abc".to_string(),
                },
                PromotePatch::StartUpdate,
            ]
        );
        assert!(f.promoter.comments().is_empty());

        let stored = f.store.activity("acme-web-master-7").unwrap();
        let step = stored.promote_steps().next().unwrap();
        assert_eq!(step.status, ActivityStatus::Running);
    }

    #[tokio::test]
    async fn test_reconciliation_is_idempotent_without_external_change() {
        let f = fixture(ControllerConfig::default());
        let activity = pending_activity();
        f.store.upsert_activity(activity.clone());
        f.git.add_pull_request(merged_pull_request("abc"));
        f.git.set_commit_statuses(
            "abc",
            vec![CommitStatus {
                url: "scan".to_string(),
                target_url: String::new(),
                state: StatusState::Failure,
                description: "scan failed".to_string(),
            }],
        );

        f.controller.check_activity_pull_requests(&activity).await;
        let first = f.store.applied_patches().len();

        // A second pass over the patched activity issues nothing new.
        let updated = f.store.activity("acme-web-master-7").unwrap();
        f.controller.check_activity_pull_requests(&updated).await;
        assert_eq!(f.store.applied_patches().len(), first);
    }

    #[tokio::test]
    async fn test_open_pr_with_green_status_is_merged() {
        let f = fixture(ControllerConfig::default());
        let activity = pending_activity();
        f.git.add_pull_request(open_pull_request());
        f.git.set_combined_status("head1", StatusState::Success);

        f.controller.check_activity_pull_requests(&activity).await;

        assert_eq!(f.git.merged_urls(), vec![PR_URL.to_string()]);
    }

    #[tokio::test]
    async fn test_no_merge_flag_disables_auto_merge() {
        let f = fixture(ControllerConfig {
            no_merge_pull_request: true,
            ..Default::default()
        });
        let activity = pending_activity();
        f.git.add_pull_request(open_pull_request());
        f.git.set_combined_status("head1", StatusState::Success);

        f.controller.check_activity_pull_requests(&activity).await;

        assert!(f.git.merged_urls().is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_pull_request_is_rebased() {
        let f = fixture(ControllerConfig {
            local_helm_repo_name: "jx".to_string(),
            ..Default::default()
        });
        let activity = pending_activity();
        f.git.add_pull_request(PullRequest {
            mergeable: Some(false),
            ..open_pull_request()
        });

        f.controller.check_activity_pull_requests(&activity).await;

        let rebases = f.promoter.rebases();
        assert_eq!(rebases.len(), 1);
        assert_eq!(
            rebases[0].1,
            ReleaseInfo {
                release_name: "staging-ns-acme-web".to_string(),
                full_app_name: "jx/acme-web".to_string(),
                version: "1.2.3".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_in_progress_build_defers_everything() {
        let f = fixture(ControllerConfig::default());
        let activity = pending_activity();
        f.git.add_pull_request(PullRequest {
            mergeable: Some(false),
            ..open_pull_request()
        });
        f.git.set_combined_status("head1", StatusState::InProgress);

        f.controller.check_activity_pull_requests(&activity).await;

        assert!(f.git.merged_urls().is_empty());
        assert!(f.promoter.rebases().is_empty());
    }

    #[tokio::test]
    async fn test_failed_last_commit_status_defers_rebase() {
        let f = fixture(ControllerConfig::default());
        let activity = pending_activity();
        f.git.add_pull_request(PullRequest {
            mergeable: Some(false),
            ..open_pull_request()
        });
        f.git.set_combined_status("head1", StatusState::Failure);

        f.controller.check_activity_pull_requests(&activity).await;

        assert!(f.git.merged_urls().is_empty());
        assert!(f.promoter.rebases().is_empty());
    }

    #[tokio::test]
    async fn test_closed_pull_request_is_left_alone() {
        let f = fixture(ControllerConfig::default());
        let activity = pending_activity();
        f.store.upsert_activity(activity.clone());
        f.git.add_pull_request(PullRequest {
            state: "closed".to_string(),
            ..open_pull_request()
        });

        f.controller.check_activity_pull_requests(&activity).await;

        assert!(patch_ops(&f).is_empty());
        assert!(f.git.merged_urls().is_empty());
        assert!(f.promoter.rebases().is_empty());
    }

    #[tokio::test]
    async fn test_bad_pull_request_url_skips_step() {
        let f = fixture(ControllerConfig::default());
        let mut activity = pending_activity();
        if let Some(step) = activity.promote_step_mut("staging") {
            step.pull_request.as_mut().unwrap().pull_request_url =
                "https://git.example/acme/acme-web/pull/not-a-number".to_string();
        }
        f.store.upsert_activity(activity.clone());

        f.controller.check_activity_pull_requests(&activity).await;

        assert!(patch_ops(&f).is_empty());
    }

    #[tokio::test]
    async fn test_git_transport_failure_is_retried_next_tick() {
        let f = fixture(ControllerConfig::default());
        let activity = pending_activity();
        f.store.upsert_activity(activity.clone());
        // No pull request primed: the fake provider errors like a dead host.

        f.controller.check_activity_pull_requests(&activity).await;
        assert!(patch_ops(&f).is_empty());

        // The host comes back; the next tick advances the step.
        f.git.add_pull_request(merged_pull_request("abc"));
        f.git.set_commit_statuses("abc", vec![success_status("ci", "")]);
        f.controller.check_activity_pull_requests(&activity).await;
        assert!(!patch_ops(&f).is_empty());
    }

    #[tokio::test]
    async fn test_terminal_step_is_not_polled() {
        let f = fixture(ControllerConfig::default());
        let mut activity = pending_activity();
        if let Some(step) = activity.promote_step_mut("staging") {
            step.status = ActivityStatus::Succeeded;
        }
        f.store.upsert_activity(activity.clone());
        f.git.add_pull_request(merged_pull_request("abc"));

        f.controller.check_activity_pull_requests(&activity).await;

        assert!(patch_ops(&f).is_empty());
    }

    #[tokio::test]
    async fn test_non_release_branch_is_not_polled() {
        let f = fixture(ControllerConfig::default());
        let mut activity = pending_activity();
        activity.spec.pipeline = "acme/acme-web/feature-x".to_string();
        f.store.upsert_activity(activity.clone());
        f.git.add_pull_request(merged_pull_request("abc"));

        f.controller.check_activity_pull_requests(&activity).await;

        assert!(patch_ops(&f).is_empty());
    }

    #[tokio::test]
    async fn test_missing_environment_blocks_completion() {
        let store = Arc::new(InMemoryStore::new());
        let git = Arc::new(FakeGitProvider::new());
        let promoter = Arc::new(FakePromoter::new());
        // No staging environment seeded.
        let controller = WorkflowController::new(
            ControllerConfig::default(),
            store.clone(),
            git.clone(),
            promoter.clone(),
        );

        let activity = pending_activity();
        store.upsert_activity(activity.clone());
        git.add_pull_request(merged_pull_request("abc"));
        git.set_commit_statuses("abc", vec![success_status("ci", "")]);

        controller.check_activity_pull_requests(&activity).await;

        let patches: Vec<PromotePatch> = store
            .applied_patches()
            .into_iter()
            .map(|(_, patch)| patch)
            .collect();
        assert!(!patches.contains(&PromotePatch::CompleteUpdate));
        assert!(promoter.comments().is_empty());

        let stored = store.activity("acme-web-master-7").unwrap();
        let step = stored.promote_steps().next().unwrap();
        assert_eq!(step.status, ActivityStatus::Running);
    }
}
