//! Resource store trait and watch events

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crest_core::activity::PipelineActivity;
use crest_core::environment::Environment;
use crest_core::patch::{PromoteKey, PromotePatch};
use crest_core::workflow::Workflow;

use crate::error::Result;

/// One change observed on a watch stream.
///
/// Watches deliver the current objects as `Added` events first, then
/// changes in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

/// The store operations the promotion controller consumes.
///
/// All operations are scoped by namespace. Patch operations mutate exactly
/// one promote step, addressed by a [`PromoteKey`]; the store owns the
/// durable copy and returns the updated activity.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Workflow>;

    async fn list_workflows(&self, namespace: &str) -> Result<Vec<Workflow>>;

    async fn create_workflow(&self, namespace: &str, workflow: Workflow) -> Result<Workflow>;

    async fn watch_workflows(&self, namespace: &str)
        -> Result<mpsc::Receiver<WatchEvent<Workflow>>>;

    async fn list_activities(&self, namespace: &str) -> Result<Vec<PipelineActivity>>;

    async fn watch_activities(
        &self,
        namespace: &str,
    ) -> Result<mpsc::Receiver<WatchEvent<PipelineActivity>>>;

    async fn apply_promote_patch(
        &self,
        namespace: &str,
        key: &PromoteKey,
        patch: PromotePatch,
    ) -> Result<PipelineActivity>;

    async fn get_environment(&self, namespace: &str, name: &str) -> Result<Environment>;

    /// Registers the workflow resource schema with the store. Idempotent;
    /// called once at controller startup.
    async fn register_workflow_schema(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crest_core::workflow::default_workflow;

    #[test]
    fn test_watch_event_wire_shape() {
        let event = WatchEvent::Added(default_workflow());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ADDED");
        assert_eq!(json["object"]["name"], "default");

        let parsed: WatchEvent<Workflow> = serde_json::from_value(json).unwrap();
        assert!(matches!(parsed, WatchEvent::Added(_)));
    }
}
