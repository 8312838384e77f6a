//! HTTP resource store client
//!
//! Watches are served by the store as newline-delimited JSON streams; the
//! client decodes events line by line and reconnects with backoff when a
//! stream expires. Undecodable events are discarded with a warning.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crest_core::activity::PipelineActivity;
use crest_core::environment::Environment;
use crest_core::patch::{PromoteKey, PromotePatch};
use crest_core::workflow::Workflow;

use crate::error::{Result, StoreError};
use crate::store::{ResourceStore, WatchEvent};

/// HTTP client for the resource store API.
#[derive(Debug, Clone)]
pub struct HttpResourceStore {
    /// Base URL of the store (e.g. "http://localhost:8080").
    base_url: String,
    client: Client,
}

impl HttpResourceStore {
    /// Create a new store client.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Get the base URL of the store.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn namespace_url(&self, namespace: &str, resource: &str) -> String {
        format!("{}/api/namespaces/{}/{}", self.base_url, namespace, resource)
    }

    /// Decodes a store response as the resource named by `resource`,
    /// mapping non-success statuses to a rejected-request error.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        resource: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "no error body".to_string());
            return Err(StoreError::rejected(status.as_u16(), resource, message));
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::decode(resource, e))
    }

    /// Checks the status of a store response whose body the caller does
    /// not need.
    async fn handle_empty_response(&self, resource: &str, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "no error body".to_string());
            return Err(StoreError::rejected(status.as_u16(), resource, message));
        }

        Ok(())
    }

    /// Spawns a task that keeps a watch stream alive and forwards its
    /// events. The task exits when the receiver is dropped.
    fn spawn_watch<T>(&self, url: String) -> mpsc::Receiver<WatchEvent<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            loop {
                match client.get(&url).send().await {
                    Ok(response) if response.status().is_success() => {
                        backoff = Duration::from_secs(1);
                        if forward_events(response, &tx).await.is_err() {
                            // Receiver dropped; nobody is listening any more.
                            return;
                        }
                    }
                    Ok(response) => {
                        warn!("Watch request to {} failed with status {}", url, response.status());
                    }
                    Err(e) => {
                        warn!("Watch request to {} failed: {}", url, e);
                    }
                }
                if tx.is_closed() {
                    return;
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
        });

        rx
    }
}

/// Forwards newline-delimited JSON events from a response body until the
/// stream ends. `Err` means the receiver was dropped.
async fn forward_events<T>(
    mut response: reqwest::Response,
    tx: &mpsc::Sender<WatchEvent<T>>,
) -> std::result::Result<(), ()>
where
    T: DeserializeOwned,
{
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = &line[..line.len() - 1];
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_slice::<WatchEvent<T>>(line) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                return Err(());
                            }
                        }
                        Err(e) => warn!("Discarding undecodable watch event: {}", e),
                    }
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("Watch stream error: {}", e);
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl ResourceStore for HttpResourceStore {
    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Workflow> {
        let url = format!("{}/{}", self.namespace_url(namespace, "workflows"), name);
        let response = self.client.get(&url).send().await?;
        if response.status().as_u16() == 404 {
            return Err(StoreError::not_found("workflow", name));
        }
        self.handle_response(&format!("workflow {name} in {namespace}"), response)
            .await
    }

    async fn list_workflows(&self, namespace: &str) -> Result<Vec<Workflow>> {
        let url = self.namespace_url(namespace, "workflows");
        let response = self.client.get(&url).send().await?;
        self.handle_response(&format!("workflows in {namespace}"), response)
            .await
    }

    async fn create_workflow(&self, namespace: &str, workflow: Workflow) -> Result<Workflow> {
        let url = self.namespace_url(namespace, "workflows");
        let name = workflow.name.clone();
        let response = self.client.post(&url).json(&workflow).send().await?;
        if response.status().as_u16() == 409 {
            return Err(StoreError::already_exists("workflow", name));
        }
        self.handle_response(&format!("workflow {name} in {namespace}"), response)
            .await
    }

    async fn watch_workflows(
        &self,
        namespace: &str,
    ) -> Result<mpsc::Receiver<WatchEvent<Workflow>>> {
        let url = format!("{}?watch=true", self.namespace_url(namespace, "workflows"));
        Ok(self.spawn_watch(url))
    }

    async fn list_activities(&self, namespace: &str) -> Result<Vec<PipelineActivity>> {
        let url = self.namespace_url(namespace, "pipelineactivities");
        let response = self.client.get(&url).send().await?;
        self.handle_response(&format!("pipeline activities in {namespace}"), response)
            .await
    }

    async fn watch_activities(
        &self,
        namespace: &str,
    ) -> Result<mpsc::Receiver<WatchEvent<PipelineActivity>>> {
        let url = format!(
            "{}?watch=true",
            self.namespace_url(namespace, "pipelineactivities")
        );
        Ok(self.spawn_watch(url))
    }

    async fn apply_promote_patch(
        &self,
        namespace: &str,
        key: &PromoteKey,
        patch: PromotePatch,
    ) -> Result<PipelineActivity> {
        let url = format!(
            "{}/{}/promotions/{}",
            self.namespace_url(namespace, "pipelineactivities"),
            key.activity,
            key.environment
        );
        let response = self.client.post(&url).json(&patch).send().await?;
        if response.status().as_u16() == 404 {
            return Err(StoreError::not_found("pipeline activity", &key.activity));
        }
        self.handle_response(
            &format!(
                "promotion {} of activity {} in {namespace}",
                key.environment, key.activity
            ),
            response,
        )
        .await
    }

    async fn get_environment(&self, namespace: &str, name: &str) -> Result<Environment> {
        let url = format!("{}/{}", self.namespace_url(namespace, "environments"), name);
        let response = self.client.get(&url).send().await?;
        if response.status().as_u16() == 404 {
            return Err(StoreError::not_found("environment", name));
        }
        self.handle_response(&format!("environment {name} in {namespace}"), response)
            .await
    }

    async fn register_workflow_schema(&self) -> Result<()> {
        let url = format!("{}/api/schemas/workflow", self.base_url);
        let response = self.client.put(&url).send().await?;
        self.handle_empty_response("workflow schema", response).await
    }
}
