//! Generic JSON-over-HTTP backend
//!
//! Speaks a minimal contract: `GET {url}/health` for probing and one
//! `POST {url}/{route}` per capability, with the task payload as the JSON
//! body and the JSON response passed through untouched. Provider-specific
//! request shaping belongs in a dedicated [`Backend`] implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{Backend, ProbeReport};
use crate::error::BackendError;
use crate::types::{BackendId, ImageInput, TaskType};

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    2
}

/// Endpoint configuration for one HTTP backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Base URL, e.g. `http://vision-01:8080`
    pub url: String,
    /// Health probe path
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Bearer token for hosted APIs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Task types this endpoint serves; empty means all
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capabilities: BTreeSet<TaskType>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl HttpBackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            health_path: default_health_path(),
            api_key: None,
            capabilities: BTreeSet::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    pub fn supports(&self, task: TaskType) -> bool {
        self.capabilities.is_empty() || self.capabilities.contains(&task)
    }
}

/// Route segment for a task type
fn route_for(task: TaskType) -> &'static str {
    match task {
        TaskType::ContentAnalysis => "analyze",
        TaskType::Classification => "classify",
        TaskType::RelationshipDetection => "relationships",
        TaskType::ImageAnalysis => "vision",
        TaskType::CreativeGeneration => "generate",
    }
}

/// [`Backend`] backed by a JSON HTTP service
pub struct HttpBackend {
    id: BackendId,
    config: HttpBackendConfig,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(id: BackendId, config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| BackendError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { id, config, client })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn health_request(&self) -> reqwest::RequestBuilder {
        self.authorized(self.client.get(self.url(&self.config.health_path)))
    }

    async fn post(&self, task: TaskType, body: Value) -> Result<Value, BackendError> {
        if !self.config.supports(task) {
            return Err(self.unsupported(task));
        }

        let req = self.authorized(self.client.post(self.url(route_for(task))).json(&body));
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn probe(&self) -> Result<ProbeReport, BackendError> {
        let start = Instant::now();
        let resp = self.health_request().send().await?;
        let ok = resp.status().is_success();
        // Read the body so a server that accepts connections but hangs counts as down
        let _body = resp.bytes().await?;
        let latency_ms = start.elapsed().as_millis() as u64;
        debug!(backend = %self.id, ok, latency_ms, "HTTP health probe");
        Ok(ProbeReport {
            available: ok,
            latency_ms,
        })
    }

    async fn analyze_content(&self, content: &Value) -> Result<Value, BackendError> {
        self.post(TaskType::ContentAnalysis, json!({ "content": content }))
            .await
    }

    async fn classify(&self, input: &Value) -> Result<Value, BackendError> {
        self.post(TaskType::Classification, json!({ "input": input }))
            .await
    }

    async fn detect_relationships(&self, entities: &[Value]) -> Result<Value, BackendError> {
        self.post(
            TaskType::RelationshipDetection,
            json!({ "entities": entities }),
        )
        .await
    }

    async fn analyze_image(&self, image: &ImageInput) -> Result<Value, BackendError> {
        let body = serde_json::to_value(image)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        self.post(TaskType::ImageAnalysis, body).await
    }

    async fn generate_creative(&self, params: &Value) -> Result<Value, BackendError> {
        self.post(TaskType::CreativeGeneration, json!({ "params": params }))
            .await
    }
}
