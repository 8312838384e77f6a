//! Promotion driver
//!
//! Walks a workflow's steps in declared order and opens a promotion pull
//! request for every step whose environment has none yet and whose
//! preconditions are met. Re-running the driver on an unchanged activity
//! is a no-op because a recorded pull request URL short-circuits the step;
//! that is what makes restarts safe.

use tracing::{info, warn};

use crest_core::activity::PipelineActivity;
use crest_core::workflow::{can_execute_step, promote_status_map, Workflow};

use super::WorkflowController;

impl WorkflowController {
    /// Opens pull requests for every workflow step that is ready to fire.
    ///
    /// Promoter failures are logged per step; iteration continues with the
    /// remaining steps.
    pub(super) async fn drive_activity(&self, flow: &Workflow, activity: &PipelineActivity) {
        let status_map = promote_status_map(activity);

        for step in &flow.spec.steps {
            let Some(promote) = &step.promote else {
                continue;
            };
            let env_name = promote.environment.as_str();
            if env_name.is_empty() {
                continue;
            }

            let has_pull_request = status_map
                .get(env_name)
                .and_then(|status| status.pull_request.as_ref())
                .is_some_and(|pr| !pr.pull_request_url.is_empty());
            if has_pull_request {
                continue;
            }

            if !can_execute_step(flow, activity, step, &status_map, env_name) {
                continue;
            }

            info!(
                "Creating PR for environment {} from pipeline activity {}",
                env_name, activity.name
            );
            let request = self.promote_request(activity, env_name);
            if let Err(e) = self.promoter.promote(&request).await {
                warn!(
                    "Failed to create pull request on pipeline {} repo {} version {}: {:#}",
                    activity.name, request.application, request.version, e
                );
            }
        }
    }
}
