//! Pipeline activity domain types
//!
//! A `PipelineActivity` records one build of one source repository and the
//! promotion steps performed for it. Activities are created by build
//! tooling; the controller reads them and mutates promote steps only
//! through the patch commands in [`crate::patch`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A record of one build of one source repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineActivity {
    pub name: String,
    pub spec: ActivitySpec,
}

/// Activity identity and state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySpec {
    /// Pipeline path in `owner/repo/branch` form.
    #[serde(default)]
    pub pipeline: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub version: String,
    /// Workflow name; empty is treated as `default`.
    #[serde(default)]
    pub workflow: String,
    #[serde(default)]
    pub workflow_status: ActivityStatus,
    #[serde(default)]
    pub git_url: String,
    #[serde(default)]
    pub git_repository: String,
    #[serde(default)]
    pub steps: Vec<ActivityStep>,
}

impl PipelineActivity {
    /// The source repository name.
    ///
    /// Falls back to the second-to-last segment of the pipeline path when
    /// the activity does not carry an explicit repository name.
    pub fn repository_name(&self) -> &str {
        if !self.spec.git_repository.is_empty() {
            return &self.spec.git_repository;
        }
        let paths: Vec<&str> = self.spec.pipeline.split('/').collect();
        if paths.len() > 1 { paths[paths.len() - 2] } else { "" }
    }

    /// The source branch, i.e. the last segment of the pipeline path.
    pub fn branch_name(&self) -> &str {
        self.spec.pipeline.rsplit('/').next().unwrap_or("")
    }

    /// Iterates the promote steps of this activity in declared order.
    pub fn promote_steps(&self) -> impl Iterator<Item = &PromoteActivityStep> {
        self.spec.steps.iter().filter_map(|step| match step {
            ActivityStep::Promote(promote) => Some(promote),
            _ => None,
        })
    }

    /// Looks up the promote step for an environment, if one exists.
    pub fn promote_step_mut(&mut self, environment: &str) -> Option<&mut PromoteActivityStep> {
        self.spec.steps.iter_mut().find_map(|step| match step {
            ActivityStep::Promote(promote) if promote.environment == environment => Some(promote),
            _ => None,
        })
    }
}

/// One entry in an activity's step list.
///
/// Stored as a tagged variant: a step is either a pipeline stage or a
/// promotion, never a bag of optional fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActivityStep {
    Stage(StageActivityStep),
    Promote(PromoteActivityStep),
}

/// A build stage recorded by the pipeline itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageActivityStep {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: ActivityStatus,
}

/// The state of a single promotion of this activity into one environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteActivityStep {
    pub environment: String,
    #[serde(default)]
    pub status: ActivityStatus,
    pub started_timestamp: Option<DateTime<Utc>>,
    pub completed_timestamp: Option<DateTime<Utc>>,
    pub pull_request: Option<PromotePullRequestStep>,
    pub update: Option<PromoteUpdateStep>,
}

/// The pull-request half of a promote step: from PR creation to merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotePullRequestStep {
    #[serde(default)]
    pub status: ActivityStatus,
    pub started_timestamp: Option<DateTime<Utc>>,
    pub completed_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pull_request_url: String,
    #[serde(default)]
    pub merge_commit_sha: String,
}

/// The update half of a promote step: from merge to a fully rolled-out
/// environment, tracked through commit statuses on the merge commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteUpdateStep {
    #[serde(default)]
    pub status: ActivityStatus,
    pub started_timestamp: Option<DateTime<Utc>>,
    pub completed_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub statuses: Vec<GitStatus>,
}

/// A commit status recorded against the update step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitStatus {
    pub url: String,
    pub status: String,
}

/// Lifecycle status shared by activities and their steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl ActivityStatus {
    /// Whether this status is terminal.
    pub fn is_terminated(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}
