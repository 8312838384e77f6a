//! Workflow controller
//!
//! Coordinates two watch streams and a periodic poller:
//! - the workflow watch maintains the workflow cache,
//! - the activity watch admits activities into the pending set and runs
//!   the promotion driver,
//! - the poll interval drives the pull-request reconciler over the
//!   pending set.
//!
//! Watch consumers forward their events into one queue consumed by a
//! single task, so the maps need no locks and reconciliation passes are
//! serialized. A poll tick that fires while the previous pass is still
//! running is coalesced.

mod driver;
mod reconciler;

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crest_client::{ResourceStore, WatchEvent};
use crest_core::activity::PipelineActivity;
use crest_core::workflow::{default_workflow, Workflow, DEFAULT_WORKFLOW_NAME};
use crest_git::GitProvider;

use crate::config::ControllerConfig;
use crate::promote::{PromoteRequest, Promoter};

/// Events consumed by the controller task.
enum ControllerEvent {
    Workflow(WatchEvent<Workflow>),
    Activity(WatchEvent<PipelineActivity>),
}

/// The promotion workflow controller.
pub struct WorkflowController {
    config: ControllerConfig,
    store: Arc<dyn ResourceStore>,
    git: Arc<dyn GitProvider>,
    promoter: Arc<dyn Promoter>,
    /// Latest observed workflows by name.
    workflow_map: HashMap<String, Workflow>,
    /// Pending activities by name: non-terminal, on a release branch,
    /// with complete identity.
    pipeline_map: HashMap<String, PipelineActivity>,
}

impl WorkflowController {
    /// Creates a controller. The configuration must already be validated.
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn ResourceStore>,
        git: Arc<dyn GitProvider>,
        promoter: Arc<dyn Promoter>,
    ) -> Self {
        Self {
            config,
            store,
            git,
            promoter,
            workflow_map: HashMap::new(),
            pipeline_map: HashMap::new(),
        }
    }

    /// Runs the controller until the token is cancelled.
    ///
    /// With `no_watch` set this performs a single pass over the listed
    /// workflows and activities and returns.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.store
            .register_workflow_schema()
            .await
            .context("Failed to register the workflow schema")?;

        if self.config.no_watch {
            return self.run_once().await;
        }

        let namespace = self.config.namespace.clone();
        info!("Watching for pipeline activities in namespace {namespace}");

        let (tx, mut rx) = mpsc::channel(256);

        let workflows = self
            .store
            .watch_workflows(&namespace)
            .await
            .context("Failed to watch workflows")?;
        spawn_forwarder(workflows, tx.clone(), ControllerEvent::Workflow, shutdown.clone());

        let activities = self
            .store
            .watch_activities(&namespace)
            .await
            .context("Failed to watch pipeline activities")?;
        spawn_forwarder(activities, tx, ControllerEvent::Activity, shutdown.clone());

        let mut poll = time::interval(self.config.pull_request_poll_time);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; consume it
        // so polling starts one interval in, after the watches settle.
        poll.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Workflow controller shutting down");
                    return Ok(());
                }
                Some(event) = rx.recv() => {
                    self.handle_event(event).await;
                }
                _ = poll.tick() => {
                    self.check_pull_requests().await;
                }
            }
        }
    }

    /// Performs one pass over the stored workflows and activities.
    pub async fn run_once(&mut self) -> Result<()> {
        let namespace = self.config.namespace.clone();

        let workflows = self
            .store
            .list_workflows(&namespace)
            .await
            .context("Failed to list workflows")?;
        for workflow in workflows {
            self.on_workflow(workflow);
        }

        let activities = self
            .store
            .list_activities(&namespace)
            .await
            .context("Failed to list pipeline activities")?;
        for activity in activities {
            self.on_activity(activity).await;
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Workflow(WatchEvent::Added(workflow))
            | ControllerEvent::Workflow(WatchEvent::Modified(workflow)) => {
                self.on_workflow(workflow);
            }
            ControllerEvent::Workflow(WatchEvent::Deleted(workflow)) => {
                self.on_workflow_delete(&workflow);
            }
            ControllerEvent::Activity(WatchEvent::Added(activity))
            | ControllerEvent::Activity(WatchEvent::Modified(activity)) => {
                self.on_activity(activity).await;
            }
            ControllerEvent::Activity(WatchEvent::Deleted(activity)) => {
                self.pipeline_map.remove(&activity.name);
            }
        }
    }

    fn on_workflow(&mut self, workflow: Workflow) {
        self.workflow_map.insert(workflow.name.clone(), workflow);
    }

    fn on_workflow_delete(&mut self, workflow: &Workflow) {
        self.workflow_map.remove(&workflow.name);
    }

    /// Admits an activity into the pending set and drives its promotions.
    ///
    /// Activities with incomplete identity, a terminal workflow status, an
    /// unresolvable workflow, or a non-release branch are evicted.
    async fn on_activity(&mut self, activity: PipelineActivity) {
        let repo = activity.repository_name().to_string();
        let branch = activity.branch_name().to_string();
        let spec = &activity.spec;

        debug!(
            "Processing pipeline {} repo {} version {} with workflow {} and status {}",
            activity.name, repo, spec.version, spec.workflow, spec.workflow_status
        );

        if repo.is_empty()
            || spec.version.is_empty()
            || spec.build.is_empty()
            || spec.pipeline.is_empty()
        {
            debug!(
                "Ignoring pipeline {} repo {} version {} with missing data",
                activity.name, repo, spec.version
            );
            self.pipeline_map.remove(&activity.name);
            return;
        }

        if spec.workflow_status.is_terminated() {
            self.pipeline_map.remove(&activity.name);
            return;
        }

        let workflow_name = if spec.workflow.is_empty() {
            DEFAULT_WORKFLOW_NAME
        } else {
            spec.workflow.as_str()
        };

        let flow = match self.workflow_map.get(workflow_name) {
            Some(flow) => flow.clone(),
            None if workflow_name == DEFAULT_WORKFLOW_NAME => {
                match self.create_default_workflow().await {
                    Ok(flow) => {
                        self.workflow_map.insert(flow.name.clone(), flow.clone());
                        flow
                    }
                    Err(e) => {
                        warn!("Cannot create default workflow: {}", e);
                        self.pipeline_map.remove(&activity.name);
                        return;
                    }
                }
            }
            None => {
                warn!(
                    "Cannot process pipeline {} due to workflow name {} not existing",
                    activity.name, workflow_name
                );
                self.pipeline_map.remove(&activity.name);
                return;
            }
        };

        if !self.config.is_release_branch(&branch) {
            info!("Ignoring branch {}", branch);
            self.pipeline_map.remove(&activity.name);
            return;
        }

        self.pipeline_map
            .insert(activity.name.clone(), activity.clone());

        self.drive_activity(&flow, &activity).await;
    }

    /// Creates the default workflow in the store. A conflict means another
    /// writer got there first; use the stored copy.
    async fn create_default_workflow(&self) -> crest_client::Result<Workflow> {
        match self
            .store
            .create_workflow(&self.config.namespace, default_workflow())
            .await
        {
            Ok(flow) => Ok(flow),
            Err(e) if e.is_conflict() => {
                self.store
                    .get_workflow(&self.config.namespace, DEFAULT_WORKFLOW_NAME)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    fn promote_request(&self, activity: &PipelineActivity, environment: &str) -> PromoteRequest {
        PromoteRequest {
            application: activity.repository_name().to_string(),
            environment: environment.to_string(),
            pipeline: activity.spec.pipeline.clone(),
            build: activity.spec.build.clone(),
            version: activity.spec.version.clone(),
            helm_repository_url: self.config.helm_repository_url.clone(),
            local_helm_repo_name: self.config.local_helm_repo_name.clone(),
        }
    }
}

/// Forwards watch events into the controller queue until the stream ends
/// or shutdown is requested.
fn spawn_forwarder<T, F>(
    mut events: mpsc::Receiver<WatchEvent<T>>,
    tx: mpsc::Sender<ControllerEvent>,
    wrap: F,
    shutdown: CancellationToken,
) where
    T: Send + 'static,
    F: Fn(WatchEvent<T>) -> ControllerEvent + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                event = events.recv() => {
                    let Some(event) = event else { return };
                    if tx.send(wrap(event)).await.is_err() {
                        return;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crest_client::InMemoryStore;
    use crest_core::activity::{ActivitySpec, ActivityStatus};
    use crest_core::workflow::Workflow;
    use crest_git::FakeGitProvider;

    use crate::promote::FakePromoter;

    fn controller(
        store: Arc<InMemoryStore>,
        promoter: Arc<FakePromoter>,
    ) -> WorkflowController {
        WorkflowController::new(
            ControllerConfig::default(),
            store,
            Arc::new(FakeGitProvider::new()),
            promoter,
        )
    }

    fn running_activity(name: &str, pipeline: &str) -> PipelineActivity {
        PipelineActivity {
            name: name.to_string(),
            spec: ActivitySpec {
                pipeline: pipeline.to_string(),
                build: "7".to_string(),
                version: "1.2.3".to_string(),
                workflow_status: ActivityStatus::Running,
                git_url: "https://git.example/acme/acme-web.git".to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_admission_inserts_pending_activity() {
        let store = Arc::new(InMemoryStore::new());
        let promoter = Arc::new(FakePromoter::new());
        let mut controller = controller(store, promoter.clone());

        controller
            .on_activity(running_activity("acme-web-master-7", "acme/acme-web/master"))
            .await;

        assert!(controller.pipeline_map.contains_key("acme-web-master-7"));
        // The default workflow promotes to staging first.
        let promotions = promoter.promotions();
        assert_eq!(promotions.len(), 1);
        assert_eq!(promotions[0].environment, "staging");
    }

    #[tokio::test]
    async fn test_terminal_activity_is_evicted() {
        let store = Arc::new(InMemoryStore::new());
        let promoter = Arc::new(FakePromoter::new());
        let mut controller = controller(store, promoter.clone());

        controller
            .on_activity(running_activity("acme-web-master-7", "acme/acme-web/master"))
            .await;
        assert!(controller.pipeline_map.contains_key("acme-web-master-7"));

        let mut finished = running_activity("acme-web-master-7", "acme/acme-web/master");
        finished.spec.workflow_status = ActivityStatus::Succeeded;
        controller.on_activity(finished).await;

        assert!(!controller.pipeline_map.contains_key("acme-web-master-7"));
    }

    #[tokio::test]
    async fn test_non_release_branch_is_evicted() {
        let store = Arc::new(InMemoryStore::new());
        let promoter = Arc::new(FakePromoter::new());
        let mut controller = controller(store, promoter.clone());

        controller
            .on_activity(running_activity(
                "acme-web-feature-x-1",
                "acme/acme-web/feature-x",
            ))
            .await;

        assert!(controller.pipeline_map.is_empty());
        assert!(promoter.promotions().is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_identity_is_evicted() {
        let store = Arc::new(InMemoryStore::new());
        let promoter = Arc::new(FakePromoter::new());
        let mut controller = controller(store, promoter.clone());

        let mut activity = running_activity("acme-web-master-7", "acme/acme-web/master");
        activity.spec.version = String::new();
        controller.on_activity(activity).await;

        assert!(controller.pipeline_map.is_empty());
        assert!(promoter.promotions().is_empty());
    }

    #[tokio::test]
    async fn test_default_workflow_is_created_on_demand() {
        let store = Arc::new(InMemoryStore::new());
        let promoter = Arc::new(FakePromoter::new());
        let mut controller = controller(store.clone(), promoter);

        controller
            .on_activity(running_activity("acme-web-master-7", "acme/acme-web/master"))
            .await;

        // Populated in the store and in the cache before the driver ran.
        assert!(store.workflow("default").is_some());
        assert!(controller.workflow_map.contains_key("default"));
    }

    #[tokio::test]
    async fn test_default_workflow_conflict_falls_back_to_stored() {
        let store = Arc::new(InMemoryStore::new());
        store.strict_workflow_creation(true);
        store.add_workflow(default_workflow());
        let promoter = Arc::new(FakePromoter::new());
        // The cache is cold, so admission races the stored default.
        let mut controller = controller(store, promoter.clone());

        controller
            .on_activity(running_activity("acme-web-master-7", "acme/acme-web/master"))
            .await;

        assert!(controller.pipeline_map.contains_key("acme-web-master-7"));
        assert!(controller.workflow_map.contains_key("default"));
        assert_eq!(promoter.promotions().len(), 1);
    }

    #[tokio::test]
    async fn test_default_workflow_creation_failure_evicts() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_workflow_creation(true);
        let promoter = Arc::new(FakePromoter::new());
        let mut controller = controller(store, promoter.clone());

        controller
            .on_activity(running_activity("acme-web-master-7", "acme/acme-web/master"))
            .await;

        assert!(controller.pipeline_map.is_empty());
        assert!(promoter.promotions().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_workflow_evicts() {
        let store = Arc::new(InMemoryStore::new());
        let promoter = Arc::new(FakePromoter::new());
        let mut controller = controller(store, promoter.clone());

        let mut activity = running_activity("acme-web-master-7", "acme/acme-web/master");
        activity.spec.workflow = "custom".to_string();
        controller.on_activity(activity).await;

        assert!(controller.pipeline_map.is_empty());
        assert!(promoter.promotions().is_empty());
    }

    #[tokio::test]
    async fn test_workflow_cache_follows_events() {
        let store = Arc::new(InMemoryStore::new());
        let promoter = Arc::new(FakePromoter::new());
        let mut controller = controller(store, promoter);

        let flow = Workflow {
            name: "custom".to_string(),
            spec: Default::default(),
        };
        controller.on_workflow(flow.clone());
        assert!(controller.workflow_map.contains_key("custom"));

        controller.on_workflow_delete(&flow);
        assert!(!controller.workflow_map.contains_key("custom"));
    }

    #[tokio::test]
    async fn test_run_once_drives_listed_activities() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_activity(running_activity("acme-web-master-7", "acme/acme-web/master"));
        let promoter = Arc::new(FakePromoter::new());
        let mut controller = WorkflowController::new(
            ControllerConfig {
                no_watch: true,
                ..Default::default()
            },
            store.clone(),
            Arc::new(FakeGitProvider::new()),
            promoter.clone(),
        );

        let shutdown = CancellationToken::new();
        controller.run(shutdown).await.unwrap();

        assert_eq!(promoter.promotions().len(), 1);
        // The schema is registered exactly once at startup.
        assert_eq!(store.schema_registration_count(), 1);
    }

    #[tokio::test]
    async fn test_watch_mode_processes_activity_events() {
        let store = Arc::new(InMemoryStore::new());
        let promoter = Arc::new(FakePromoter::new());
        let mut controller = WorkflowController::new(
            ControllerConfig {
                // Keep the poller out of the way for this test.
                pull_request_poll_time: std::time::Duration::from_secs(3600),
                ..Default::default()
            },
            store.clone(),
            Arc::new(FakeGitProvider::new()),
            promoter.clone(),
        );

        store.upsert_activity(running_activity("acme-web-master-7", "acme/acme-web/master"));

        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let handle = tokio::spawn(async move { controller.run(shutdown).await });

        // Give the event loop a moment to absorb the replayed add event.
        for _ in 0..50 {
            if !promoter.promotions().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        stop.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(promoter.promotions().len(), 1);
        assert_eq!(promoter.promotions()[0].environment, "staging");
    }
}
