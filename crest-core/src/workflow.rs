//! Workflow domain types and promotion preconditions
//!
//! A workflow is a declarative, ordered set of promotion steps. Step order
//! is a topological order consistent with the step preconditions; the
//! controller relies on the author for that and never re-sorts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::activity::{ActivityStatus, PipelineActivity, PromoteActivityStep};

/// Name resolved for activities that do not reference a workflow.
pub const DEFAULT_WORKFLOW_NAME: &str = "default";

/// A declarative promotion workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub spec: WorkflowSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

/// One step of a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub promote: Option<PromoteWorkflowStep>,
    #[serde(default)]
    pub preconditions: WorkflowPreconditions,
}

/// The promote payload of a workflow step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteWorkflowStep {
    pub environment: String,
}

/// Environments that must have succeeded before a step may fire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPreconditions {
    #[serde(default)]
    pub environments: Vec<String>,
}

impl Workflow {
    /// Creates a step that promotes to `environment` once every listed
    /// precondition environment has succeeded.
    pub fn promote_step(environment: &str, preconditions: &[&str]) -> WorkflowStep {
        WorkflowStep {
            promote: Some(PromoteWorkflowStep {
                environment: environment.to_string(),
            }),
            preconditions: WorkflowPreconditions {
                environments: preconditions.iter().map(|s| s.to_string()).collect(),
            },
        }
    }
}

/// The workflow synthesized when an activity references `default` and no
/// stored default exists: staging first, then production once staging has
/// succeeded.
pub fn default_workflow() -> Workflow {
    Workflow {
        name: DEFAULT_WORKFLOW_NAME.to_string(),
        spec: WorkflowSpec {
            steps: vec![
                Workflow::promote_step("staging", &[]),
                Workflow::promote_step("production", &["staging"]),
            ],
        },
    }
}

/// Builds a map from environment name to the activity's promote step for
/// that environment.
///
/// Used within a single reconciliation pass; never cached across passes.
pub fn promote_status_map(activity: &PipelineActivity) -> HashMap<&str, &PromoteActivityStep> {
    let mut answer = HashMap::new();
    for promote in activity.promote_steps() {
        if !promote.environment.is_empty() {
            answer.insert(promote.environment.as_str(), promote);
        }
    }
    answer
}

/// Decides whether a workflow step may fire for the given activity.
///
/// Every precondition environment must already have a promote step with a
/// succeeded status. Failures produce warn-level diagnostics; the
/// evaluator itself never fails.
pub fn can_execute_step(
    _workflow: &Workflow,
    activity: &PipelineActivity,
    step: &WorkflowStep,
    status_map: &HashMap<&str, &PromoteActivityStep>,
    target_env: &str,
) -> bool {
    for env_name in &step.preconditions.environments {
        match status_map.get(env_name.as_str()) {
            None => {
                warn!(
                    "Cannot promote {} to environment {}: precondition environment {} has no status",
                    activity.name, target_env, env_name
                );
                return false;
            }
            Some(status) if status.status != ActivityStatus::Succeeded => {
                warn!(
                    "Cannot promote {} to environment {}: precondition environment {} has status {}",
                    activity.name, target_env, env_name, status.status
                );
                return false;
            }
            Some(_) => {}
        }
    }
    true
}
