//! In-memory resource store
//!
//! A single-namespace store used by tests and local development. Watch
//! channels replay the current objects as `Added` events before live
//! changes, the way an informer-backed watch does. Applied patches are
//! recorded so tests can assert on the exact mutation sequence.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crest_core::activity::PipelineActivity;
use crest_core::environment::Environment;
use crest_core::patch::{apply_promote_patch, PromoteKey, PromotePatch};
use crest_core::workflow::Workflow;

use crate::error::{Result, StoreError};
use crate::store::{ResourceStore, WatchEvent};

/// A resource store that keeps everything in memory.
///
/// The namespace argument of the trait methods is ignored; one instance
/// models one namespace.
#[derive(Default)]
pub struct InMemoryStore {
    workflows: Mutex<BTreeMap<String, Workflow>>,
    activities: Mutex<BTreeMap<String, PipelineActivity>>,
    environments: Mutex<BTreeMap<String, Environment>>,
    workflow_watchers: Mutex<Vec<mpsc::Sender<WatchEvent<Workflow>>>>,
    activity_watchers: Mutex<Vec<mpsc::Sender<WatchEvent<PipelineActivity>>>>,
    patches: Mutex<Vec<(PromoteKey, PromotePatch)>>,
    schema_registrations: AtomicUsize,
    fail_workflow_creation: AtomicBool,
    strict_workflow_creation: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a workflow without going through `create_workflow`.
    pub fn add_workflow(&self, workflow: Workflow) {
        let event = WatchEvent::Added(workflow.clone());
        self.workflows
            .lock()
            .unwrap()
            .insert(workflow.name.clone(), workflow);
        broadcast(&self.workflow_watchers, event);
    }

    /// Seeds an environment.
    pub fn add_environment(&self, environment: Environment) {
        self.environments
            .lock()
            .unwrap()
            .insert(environment.name.clone(), environment);
    }

    /// Inserts or replaces an activity and notifies watchers.
    pub fn upsert_activity(&self, activity: PipelineActivity) {
        let mut activities = self.activities.lock().unwrap();
        let existed = activities.contains_key(&activity.name);
        activities.insert(activity.name.clone(), activity.clone());
        drop(activities);

        let event = if existed {
            WatchEvent::Modified(activity)
        } else {
            WatchEvent::Added(activity)
        };
        broadcast(&self.activity_watchers, event);
    }

    /// Removes an activity and notifies watchers.
    pub fn remove_activity(&self, name: &str) {
        let removed = self.activities.lock().unwrap().remove(name);
        if let Some(activity) = removed {
            broadcast(&self.activity_watchers, WatchEvent::Deleted(activity));
        }
    }

    /// Returns the stored copy of an activity.
    pub fn activity(&self, name: &str) -> Option<PipelineActivity> {
        self.activities.lock().unwrap().get(name).cloned()
    }

    /// Returns the stored copy of a workflow.
    pub fn workflow(&self, name: &str) -> Option<Workflow> {
        self.workflows.lock().unwrap().get(name).cloned()
    }

    /// The patches applied through this store, in order.
    pub fn applied_patches(&self) -> Vec<(PromoteKey, PromotePatch)> {
        self.patches.lock().unwrap().clone()
    }

    /// How many times the workflow schema has been registered.
    pub fn schema_registration_count(&self) -> usize {
        self.schema_registrations.load(Ordering::SeqCst)
    }

    /// Makes subsequent `create_workflow` calls fail.
    pub fn fail_workflow_creation(&self, fail: bool) {
        self.fail_workflow_creation.store(fail, Ordering::SeqCst);
    }

    /// Makes `create_workflow` report a conflict for existing workflows,
    /// the way a real store's create does, instead of returning the
    /// stored copy.
    pub fn strict_workflow_creation(&self, strict: bool) {
        self.strict_workflow_creation.store(strict, Ordering::SeqCst);
    }
}

fn broadcast<T: Clone>(watchers: &Mutex<Vec<mpsc::Sender<WatchEvent<T>>>>, event: WatchEvent<T>) {
    let mut watchers = watchers.lock().unwrap();
    watchers.retain(|tx| tx.try_send(event.clone()).is_ok());
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_workflow(&self, _namespace: &str, name: &str) -> Result<Workflow> {
        self.workflows
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("workflow", name))
    }

    async fn list_workflows(&self, _namespace: &str) -> Result<Vec<Workflow>> {
        Ok(self.workflows.lock().unwrap().values().cloned().collect())
    }

    async fn create_workflow(&self, _namespace: &str, workflow: Workflow) -> Result<Workflow> {
        if self.fail_workflow_creation.load(Ordering::SeqCst) {
            return Err(StoreError::rejected(
                500,
                "workflows",
                "workflow creation disabled",
            ));
        }
        let mut workflows = self.workflows.lock().unwrap();
        if let Some(existing) = workflows.get(&workflow.name) {
            if self.strict_workflow_creation.load(Ordering::SeqCst) {
                return Err(StoreError::already_exists("workflow", &workflow.name));
            }
            return Ok(existing.clone());
        }
        workflows.insert(workflow.name.clone(), workflow.clone());
        drop(workflows);

        broadcast(&self.workflow_watchers, WatchEvent::Added(workflow.clone()));
        Ok(workflow)
    }

    async fn watch_workflows(
        &self,
        _namespace: &str,
    ) -> Result<mpsc::Receiver<WatchEvent<Workflow>>> {
        let (tx, rx) = mpsc::channel(64);
        for workflow in self.workflows.lock().unwrap().values() {
            let _ = tx.try_send(WatchEvent::Added(workflow.clone()));
        }
        self.workflow_watchers.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn list_activities(&self, _namespace: &str) -> Result<Vec<PipelineActivity>> {
        Ok(self.activities.lock().unwrap().values().cloned().collect())
    }

    async fn watch_activities(
        &self,
        _namespace: &str,
    ) -> Result<mpsc::Receiver<WatchEvent<PipelineActivity>>> {
        let (tx, rx) = mpsc::channel(64);
        for activity in self.activities.lock().unwrap().values() {
            let _ = tx.try_send(WatchEvent::Added(activity.clone()));
        }
        self.activity_watchers.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn apply_promote_patch(
        &self,
        _namespace: &str,
        key: &PromoteKey,
        patch: PromotePatch,
    ) -> Result<PipelineActivity> {
        let mut activities = self.activities.lock().unwrap();
        let activity = activities
            .get_mut(&key.activity)
            .ok_or_else(|| StoreError::not_found("pipeline activity", &key.activity))?;

        apply_promote_patch(activity, &key.environment, &patch).map_err(|_| {
            StoreError::not_found(
                "promote step",
                format!("{} of activity {}", key.environment, key.activity),
            )
        })?;
        let updated = activity.clone();
        drop(activities);

        self.patches.lock().unwrap().push((key.clone(), patch));
        broadcast(&self.activity_watchers, WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    async fn get_environment(&self, _namespace: &str, name: &str) -> Result<Environment> {
        self.environments
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("environment", name))
    }

    async fn register_workflow_schema(&self) -> Result<()> {
        self.schema_registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
