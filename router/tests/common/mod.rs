//! Fake backends for router integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use model_router::{
    Backend, BackendError, BackendId, BackendRegistry, ImageInput, ProbeReport, TaskType,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a capability call does
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Return `{"backend": id, "task": task}`
    Echo,
    /// Fail with the given HTTP status
    Status(u16),
    /// Sleep before echoing
    Slow(Duration),
}

pub struct FakeBackend {
    id: BackendId,
    up: AtomicBool,
    behavior: Mutex<Behavior>,
    capabilities: BTreeSet<TaskType>,
    probes: AtomicU64,
    invocations: AtomicU64,
}

impl FakeBackend {
    pub fn up(id: BackendId) -> Arc<Self> {
        Self::build(id, true, &[])
    }

    pub fn down(id: BackendId) -> Arc<Self> {
        Self::build(id, false, &[])
    }

    /// Available backend that only implements `tasks`
    pub fn limited(id: BackendId, tasks: &[TaskType]) -> Arc<Self> {
        Self::build(id, true, tasks)
    }

    fn build(id: BackendId, up: bool, tasks: &[TaskType]) -> Arc<Self> {
        Arc::new(Self {
            id,
            up: AtomicBool::new(up),
            behavior: Mutex::new(Behavior::Echo),
            capabilities: tasks.iter().copied().collect(),
            probes: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
        })
    }

    pub fn with_behavior(self: Arc<Self>, behavior: Behavior) -> Arc<Self> {
        *self.behavior.lock().unwrap() = behavior;
        self
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    async fn respond(&self, task: TaskType, input: Value) -> Result<Value, BackendError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if !self.capabilities.is_empty() && !self.capabilities.contains(&task) {
            return Err(self.unsupported(task));
        }
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Echo => {}
            Behavior::Status(code) => return Err(BackendError::Status(code)),
            Behavior::Slow(delay) => tokio::time::sleep(delay).await,
        }
        Ok(json!({ "backend": self.id, "task": task, "input": input }))
    }
}

#[async_trait]
impl Backend for FakeBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn probe(&self) -> Result<ProbeReport, BackendError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(if self.up.load(Ordering::SeqCst) {
            ProbeReport::up(3)
        } else {
            ProbeReport::down(3)
        })
    }

    async fn analyze_content(&self, content: &Value) -> Result<Value, BackendError> {
        self.respond(TaskType::ContentAnalysis, content.clone()).await
    }

    async fn classify(&self, input: &Value) -> Result<Value, BackendError> {
        self.respond(TaskType::Classification, input.clone()).await
    }

    async fn detect_relationships(&self, entities: &[Value]) -> Result<Value, BackendError> {
        self.respond(TaskType::RelationshipDetection, Value::from(entities.to_vec()))
            .await
    }

    async fn analyze_image(&self, image: &ImageInput) -> Result<Value, BackendError> {
        let input = serde_json::to_value(image).unwrap();
        self.respond(TaskType::ImageAnalysis, input).await
    }

    async fn generate_creative(&self, params: &Value) -> Result<Value, BackendError> {
        self.respond(TaskType::CreativeGeneration, params.clone()).await
    }
}

pub fn registry(backends: &[Arc<FakeBackend>]) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    for b in backends {
        registry.register(b.clone());
    }
    registry
}
