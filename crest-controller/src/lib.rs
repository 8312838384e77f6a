//! Crest Workflow Controller
//!
//! A long-running reconciler that advances in-flight releases through an
//! ordered series of target environments by creating, observing, and
//! merging promotion pull requests.
//!
//! Architecture:
//! - Configuration: controller settings with validation
//! - Promoter: the external action that opens and updates promotion PRs
//! - Controller: watch-driven admission and promotion driving, plus a
//!   periodic pull-request reconciliation pass
//!
//! The controller owns no durable state; a restart reconstructs identical
//! behavior from the resource store alone.

pub mod config;
mod controller;
pub mod promote;

pub use config::ControllerConfig;
pub use controller::WorkflowController;
