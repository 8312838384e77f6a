//! Crest Resource Store Client
//!
//! A typed client for the custom-resource store that holds `Workflow`,
//! `PipelineActivity` and `Environment` objects.
//!
//! The [`ResourceStore`] trait pins the surface the controller consumes:
//! `get`/`list`/`watch` plus named patch commands that mutate exactly one
//! promote step. [`HttpResourceStore`] talks to the store's REST API;
//! [`InMemoryStore`] backs tests and local development.

pub mod error;
mod http;
mod memory;
mod store;

pub use error::{Result, StoreError};
pub use http::HttpResourceStore;
pub use memory::InMemoryStore;
pub use store::{ResourceStore, WatchEvent};
