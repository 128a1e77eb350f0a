//! Backend capability contract and lookup
//!
//! Every model service the router can dispatch to implements [`Backend`].
//! The registry maps each [`BackendId`] to its client; the router only ever
//! refers to backends by id.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::BackendError;
use crate::types::{BackendId, ImageInput, TaskType};

pub use http::{HttpBackend, HttpBackendConfig};

/// Result of a backend health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub available: bool,
    pub latency_ms: u64,
}

impl ProbeReport {
    pub fn up(latency_ms: u64) -> Self {
        Self {
            available: true,
            latency_ms,
        }
    }

    pub fn down(latency_ms: u64) -> Self {
        Self {
            available: false,
            latency_ms,
        }
    }
}

/// Capability contract for a model backend.
///
/// Capability methods a backend does not support keep their default body,
/// which reports [`BackendError::Unsupported`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Registry key of this backend
    fn id(&self) -> BackendId;

    /// Bounded-latency connectivity check
    async fn probe(&self) -> Result<ProbeReport, BackendError>;

    async fn analyze_content(&self, content: &Value) -> Result<Value, BackendError> {
        let _ = content;
        Err(self.unsupported(TaskType::ContentAnalysis))
    }

    async fn classify(&self, input: &Value) -> Result<Value, BackendError> {
        let _ = input;
        Err(self.unsupported(TaskType::Classification))
    }

    async fn detect_relationships(&self, entities: &[Value]) -> Result<Value, BackendError> {
        let _ = entities;
        Err(self.unsupported(TaskType::RelationshipDetection))
    }

    async fn analyze_image(&self, image: &ImageInput) -> Result<Value, BackendError> {
        let _ = image;
        Err(self.unsupported(TaskType::ImageAnalysis))
    }

    async fn generate_creative(&self, params: &Value) -> Result<Value, BackendError> {
        let _ = params;
        Err(self.unsupported(TaskType::CreativeGeneration))
    }

    fn unsupported(&self, task: TaskType) -> BackendError {
        BackendError::Unsupported {
            backend: self.id(),
            task,
        }
    }
}

/// Shared handle to a backend client
pub type SharedBackend = Arc<dyn Backend>;

/// Static mapping of backend id to client
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<BackendId, SharedBackend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own id, replacing any previous entry
    pub fn register(&mut self, backend: SharedBackend) {
        self.backends.insert(backend.id(), backend);
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, backend: impl Backend + 'static) -> Self {
        self.register(Arc::new(backend));
        self
    }

    pub fn get(&self, id: BackendId) -> Option<&SharedBackend> {
        self.backends.get(&id)
    }

    pub fn contains(&self, id: BackendId) -> bool {
        self.backends.contains_key(&id)
    }

    /// Registered ids in stable order
    pub fn ids(&self) -> Vec<BackendId> {
        let mut ids: Vec<BackendId> = self.backends.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TextOnly;

    #[async_trait]
    impl Backend for TextOnly {
        fn id(&self) -> BackendId {
            BackendId::HostedLlm
        }

        async fn probe(&self) -> Result<ProbeReport, BackendError> {
            Ok(ProbeReport::up(3))
        }

        async fn classify(&self, input: &Value) -> Result<Value, BackendError> {
            Ok(json!({ "label": "lifestyle", "input": input }))
        }
    }

    #[test]
    fn test_registry_keys_by_backend_id() {
        let registry = BackendRegistry::new().with(TextOnly);
        assert!(registry.contains(BackendId::HostedLlm));
        assert!(!registry.contains(BackendId::VisionModel));
        assert_eq!(registry.ids(), vec![BackendId::HostedLlm]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_default_capability_is_unsupported() {
        let backend = TextOnly;
        let err = backend
            .analyze_image(&ImageInput::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::Unsupported {
                backend: BackendId::HostedLlm,
                task: TaskType::ImageAnalysis
            }
        ));
    }

    #[tokio::test]
    async fn test_implemented_capability_passes_through() {
        let backend = TextOnly;
        let out = backend.classify(&json!("hello")).await.unwrap();
        assert_eq!(out["label"], "lifestyle");
    }
}
