//! Crest Core
//!
//! Core types and promotion logic for the Crest CD system.
//!
//! This crate contains:
//! - Domain types: the resources the controller reads and patches
//!   (Workflow, PipelineActivity, Environment)
//! - Patch commands: named mutations applied to a single promote step
//! - Promotion logic: precondition evaluation and promote-status indexing
//!
//! Note: all I/O lives in the client crates and the controller; everything
//! here is pure and synchronous.

pub mod activity;
pub mod environment;
pub mod patch;
pub mod workflow;
