//! Named patch commands for promote steps
//!
//! The store mutates exactly one promote step per patch, addressed by a
//! [`PromoteKey`]. Patches are commands rather than closures so they can
//! travel over the wire; their application semantics live here so every
//! store implementation agrees on them.
//!
//! Application is monotonic: a terminal status is never regressed, started
//! and completed timestamps are written once, and a pull request URL or
//! merge SHA is never overwritten once assigned.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity::{
    ActivityStatus, ActivityStep, GitStatus, PipelineActivity, PromoteActivityStep,
};

/// Addresses the promote step of one activity for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteKey {
    pub activity: String,
    pub environment: String,
}

impl PromoteKey {
    pub fn new(activity: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            activity: activity.into(),
            environment: environment.into(),
        }
    }
}

/// A single mutation of a promote step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PromotePatch {
    /// Record the promotion pull request that was opened for this step.
    /// Creates the promote step if the activity does not have one yet.
    StartPullRequest { pull_request_url: String },
    /// Mark the pull-request sub-step complete and record the merge SHA.
    CompletePullRequest { merge_commit_sha: String },
    /// Mark the update sub-step started.
    StartUpdate,
    /// Replace the update sub-step's recorded commit statuses.
    SetUpdateStatuses { statuses: Vec<GitStatus> },
    /// Mark the update sub-step and the promote step complete.
    CompleteUpdate,
}

/// Errors applying a patch to an activity.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("activity {activity} has no promote step for environment {environment}")]
    StepNotFound {
        activity: String,
        environment: String,
    },
}

/// Applies a patch to the promote step of `activity` for `environment`.
///
/// `StartPullRequest` appends a promote step when none exists; every other
/// patch requires the step to be present already.
pub fn apply_promote_patch(
    activity: &mut PipelineActivity,
    environment: &str,
    patch: &PromotePatch,
) -> Result<(), PatchError> {
    if matches!(patch, PromotePatch::StartPullRequest { .. })
        && activity.promote_step_mut(environment).is_none()
    {
        activity
            .spec
            .steps
            .push(ActivityStep::Promote(PromoteActivityStep {
                environment: environment.to_string(),
                ..Default::default()
            }));
    }

    let name = activity.name.clone();
    let step = activity
        .promote_step_mut(environment)
        .ok_or_else(|| PatchError::StepNotFound {
            activity: name,
            environment: environment.to_string(),
        })?;

    match patch {
        PromotePatch::StartPullRequest { pull_request_url } => {
            mark_running(step);
            let pr = step.pull_request.get_or_insert_with(Default::default);
            if !pr.status.is_terminated() {
                pr.status = ActivityStatus::Running;
            }
            if pr.started_timestamp.is_none() {
                pr.started_timestamp = Some(Utc::now());
            }
            if pr.pull_request_url.is_empty() {
                pr.pull_request_url = pull_request_url.clone();
            }
        }
        PromotePatch::CompletePullRequest { merge_commit_sha } => {
            mark_running(step);
            let pr = step.pull_request.get_or_insert_with(Default::default);
            complete(&mut pr.status, &mut pr.completed_timestamp);
            if pr.merge_commit_sha.is_empty() {
                pr.merge_commit_sha = merge_commit_sha.clone();
            }
        }
        PromotePatch::StartUpdate => {
            mark_running(step);
            let update = step.update.get_or_insert_with(Default::default);
            if !update.status.is_terminated() {
                update.status = ActivityStatus::Running;
            }
            if update.started_timestamp.is_none() {
                update.started_timestamp = Some(Utc::now());
            }
        }
        PromotePatch::SetUpdateStatuses { statuses } => {
            let update = step.update.get_or_insert_with(Default::default);
            update.statuses = statuses.clone();
        }
        PromotePatch::CompleteUpdate => {
            let update = step.update.get_or_insert_with(Default::default);
            complete(&mut update.status, &mut update.completed_timestamp);
            complete_step(step);
        }
    }
    Ok(())
}

fn mark_running(step: &mut PromoteActivityStep) {
    if !step.status.is_terminated() {
        step.status = ActivityStatus::Running;
    }
    if step.started_timestamp.is_none() {
        step.started_timestamp = Some(Utc::now());
    }
}

fn complete_step(step: &mut PromoteActivityStep) {
    if !step.status.is_terminated() {
        step.status = ActivityStatus::Succeeded;
    }
    if step.completed_timestamp.is_none() {
        step.completed_timestamp = Some(Utc::now());
    }
}

fn complete(
    status: &mut ActivityStatus,
    completed: &mut Option<chrono::DateTime<Utc>>,
) {
    if !status.is_terminated() {
        *status = ActivityStatus::Succeeded;
    }
    if completed.is_none() {
        *completed = Some(Utc::now());
    }
}
