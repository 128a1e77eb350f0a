//! Dispatch state machine
//!
//! ```text
//! Classified → Selected → AvailabilityChecked ─┬─ available ──→ Dispatched → Completed | Failed
//!                              ▲               └─ unavailable → FallbackResolved ─┐
//!                              └──────────────────────────────────────────────────┘
//! ```
//!
//! The fallback walk only covers unavailability. Once a backend is invoked
//! its failure is returned to the caller as-is; the chain is not consulted
//! again.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::availability::{
    AvailabilityRecord, AvailabilityStatus, AvailabilityTracker, DEFAULT_AVAILABILITY_TTL,
    DEFAULT_PROBE_TIMEOUT,
};
use crate::config::RouterConfig;
use crate::error::{BackendError, RouterError, RouterResult};
use crate::events::{DispatchId, EventBus, RouterEvent, SharedEventBus};
use crate::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::registry::{Backend, BackendRegistry, SharedBackend};
use crate::router::classifier::TaskClassifier;
use crate::router::fallback::{FallbackResolver, FallbackTable};
use crate::router::selector::{BackendSelector, SelectionTable, DEFAULT_BACKEND};
use crate::types::{AiRequest, BackendId, ImageInput, TaskType};

/// Default upper bound on a single capability call
pub const DEFAULT_INVOCATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Successful dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Backend that produced the output
    pub backend: BackendId,
    pub task_type: TaskType,
    /// Time spent in the capability call
    pub duration_ms: u64,
    /// Fallback hops taken before an available backend was found
    pub fallback_hops: u32,
    /// Backend output, returned verbatim
    pub output: Value,
}

/// Builder for [`Router`]
pub struct RouterBuilder {
    registry: BackendRegistry,
    selection: SelectionTable,
    fallbacks: FallbackTable,
    default_backend: BackendId,
    availability_ttl: Duration,
    probe_timeout: Duration,
    invocation_timeout: Duration,
    events: Option<SharedEventBus>,
}

impl RouterBuilder {
    fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            selection: SelectionTable::default_table(),
            fallbacks: FallbackTable::default_table(),
            default_backend: DEFAULT_BACKEND,
            availability_ttl: DEFAULT_AVAILABILITY_TTL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            invocation_timeout: DEFAULT_INVOCATION_TIMEOUT,
            events: None,
        }
    }

    pub fn selection(mut self, table: SelectionTable) -> Self {
        self.selection = table;
        self
    }

    pub fn fallbacks(mut self, table: FallbackTable) -> Self {
        self.fallbacks = table;
        self
    }

    pub fn default_backend(mut self, backend: BackendId) -> Self {
        self.default_backend = backend;
        self
    }

    pub fn availability_ttl(mut self, ttl: Duration) -> Self {
        self.availability_ttl = ttl;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    /// Publish to an existing bus instead of a private one
    pub fn events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Router {
        let events = self.events.unwrap_or_else(|| EventBus::new().shared());
        if let Some(cycle) = self.fallbacks.find_cycle() {
            warn!(cycle = %cycle, "Fallback table contains a cycle");
        }

        let availability = AvailabilityTracker::new(
            &self.registry,
            self.availability_ttl,
            self.probe_timeout,
            events.clone(),
        );
        let selector = BackendSelector::new(
            self.selection,
            self.default_backend,
            self.registry.ids(),
        );

        Router {
            classifier: TaskClassifier::new(),
            selector,
            availability,
            fallbacks: FallbackResolver::new(self.fallbacks),
            metrics: MetricsRecorder::new(),
            events,
            invocation_timeout: self.invocation_timeout,
            registry: self.registry,
        }
    }
}

/// Backend chosen by the availability walk
struct Resolved {
    backend: BackendId,
    client: SharedBackend,
    hops: u32,
}

/// Routes AI task requests to model backends.
///
/// All state is owned here; there are no process globals. Safe to share
/// behind an `Arc` and dispatch from many tasks at once.
pub struct Router {
    registry: BackendRegistry,
    classifier: TaskClassifier,
    selector: BackendSelector,
    availability: AvailabilityTracker,
    fallbacks: FallbackResolver,
    metrics: MetricsRecorder,
    events: SharedEventBus,
    invocation_timeout: Duration,
}

impl Router {
    pub fn builder(registry: BackendRegistry) -> RouterBuilder {
        RouterBuilder::new(registry)
    }

    /// Router using the tables and timeouts from `config`
    pub fn from_config(config: &RouterConfig, registry: BackendRegistry) -> Self {
        Self::builder(registry)
            .selection(config.selection_table())
            .fallbacks(config.fallback_table())
            .default_backend(config.default_backend)
            .availability_ttl(config.availability_ttl())
            .probe_timeout(config.probe_timeout())
            .invocation_timeout(config.invocation_timeout())
            .build()
    }

    /// Classify, select, walk fallbacks until an available backend is found,
    /// then invoke it.
    pub async fn dispatch(&self, request: &AiRequest) -> RouterResult<DispatchResult> {
        let dispatch_id = RouterEvent::new_dispatch_id();

        let task = self.classifier.classify(request);
        let signals = self.classifier.signals(request);
        debug!(dispatch_id = %dispatch_id, task = %task, signals = ?signals, "Task classified");
        self.events.publish(RouterEvent::TaskClassified {
            dispatch_id: dispatch_id.clone(),
            task_type: task,
            timestamp: Utc::now(),
        });

        let selection = self.selector.select(task, request, &request.options);
        debug!(
            dispatch_id = %dispatch_id,
            task = %task,
            backend = %selection.backend,
            reason = ?selection.reason,
            "Backend selected"
        );
        self.events.publish(RouterEvent::BackendSelected {
            dispatch_id: dispatch_id.clone(),
            task_type: task,
            backend: selection.backend,
            reason: selection.reason,
            timestamp: Utc::now(),
        });

        let resolved = match self.resolve(&dispatch_id, task, selection.backend).await {
            Ok(resolved) => resolved,
            Err(tried) => {
                let err = RouterError::NoBackendAvailable {
                    task_type: task,
                    tried,
                };
                self.metrics.record_unrouted();
                warn!(dispatch_id = %dispatch_id, task = %task, "{err}");
                self.publish_failure(&dispatch_id, &err);
                return Err(err);
            }
        };

        self.invoke(&dispatch_id, task, request, resolved).await
    }

    /// Walk from `primary` through fallback chains to the first available
    /// backend. On exhaustion returns the backends tried, in order.
    ///
    /// Chains are walked depth-first: each entry is checked in order, and an
    /// unavailable entry's own chain is tried before the next entry. A backend
    /// already tried is skipped; one that leads back to a backend still being
    /// expanded is a cycle and ends the walk.
    async fn resolve(
        &self,
        dispatch_id: &DispatchId,
        task: TaskType,
        primary: BackendId,
    ) -> Result<Resolved, Vec<BackendId>> {
        let table = self.fallbacks.table();
        let mut current = primary;
        let mut tried = Vec::new();
        let mut visited = BTreeSet::new();
        // (backend whose chain is being walked, next index into it)
        let mut path: Vec<(BackendId, usize)> = Vec::new();
        let mut hops = 0u32;

        loop {
            visited.insert(current);
            tried.push(current);

            let available = self.availability.is_available(current).await;
            self.events.publish(RouterEvent::AvailabilityChecked {
                dispatch_id: dispatch_id.clone(),
                backend: current,
                available,
                timestamp: Utc::now(),
            });

            if available {
                if let Some(client) = self.registry.get(current) {
                    return Ok(Resolved {
                        backend: current,
                        client: client.clone(),
                        hops,
                    });
                }
            }
            path.push((current, 0));

            let (from, next) = loop {
                let Some((owner, index)) = path.last_mut() else {
                    return Err(tried);
                };
                let owner = *owner;
                let Some(&next) = table.chain_for(owner, task).get(*index) else {
                    path.pop();
                    continue;
                };
                *index += 1;

                if path.iter().any(|(b, _)| *b == next) {
                    warn!(
                        dispatch_id = %dispatch_id,
                        task = %task,
                        from = %owner,
                        to = %next,
                        "Fallback chain revisits a backend, treating as exhausted"
                    );
                    return Err(tried);
                }
                if !visited.contains(&next) {
                    break (owner, next);
                }
            };

            warn!(
                dispatch_id = %dispatch_id,
                task = %task,
                from = %from,
                to = %next,
                "Backend unavailable, falling back"
            );
            self.events.publish(RouterEvent::FallbackTriggered {
                dispatch_id: dispatch_id.clone(),
                task_type: task,
                from,
                to: next,
                timestamp: Utc::now(),
            });
            hops += 1;
            current = next;
        }
    }

    async fn invoke(
        &self,
        dispatch_id: &DispatchId,
        task: TaskType,
        request: &AiRequest,
        resolved: Resolved,
    ) -> RouterResult<DispatchResult> {
        let limit = self.invocation_timeout;
        let call = async {
            tokio::time::timeout(limit, call_capability(resolved.client.as_ref(), task, request))
                .await
                .unwrap_or(Err(BackendError::Timeout(limit)))
        };
        let observed = self.metrics.observe(resolved.backend, task, call).await;
        let duration_ms = observed.outcome.duration_ms;

        match observed.result {
            Ok(output) => {
                info!(
                    dispatch_id = %dispatch_id,
                    task = %task,
                    backend = %resolved.backend,
                    duration_ms,
                    fallback_hops = resolved.hops,
                    "Dispatch completed"
                );
                self.events.publish(RouterEvent::DispatchCompleted {
                    dispatch_id: dispatch_id.clone(),
                    task_type: task,
                    backend: resolved.backend,
                    duration_ms,
                    fallback_hops: resolved.hops,
                    timestamp: Utc::now(),
                });
                Ok(DispatchResult {
                    backend: resolved.backend,
                    task_type: task,
                    duration_ms,
                    fallback_hops: resolved.hops,
                    output,
                })
            }
            Err(source) => {
                let err = RouterError::BackendInvocation {
                    backend: resolved.backend,
                    task_type: task,
                    duration_ms,
                    source,
                };
                warn!(dispatch_id = %dispatch_id, error = %err, "Dispatch failed");
                self.publish_failure(dispatch_id, &err);
                Err(err)
            }
        }
    }

    fn publish_failure(&self, dispatch_id: &DispatchId, err: &RouterError) {
        let error_kind = match err {
            RouterError::BackendInvocation { source, .. } => Some(source.kind()),
            RouterError::NoBackendAvailable { .. } => None,
        };
        self.events.publish(RouterEvent::DispatchFailed {
            dispatch_id: dispatch_id.clone(),
            task_type: err.task_type(),
            backend: err.backend(),
            error_kind,
            error: err.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Probe every registered backend now
    pub async fn refresh_all(&self) -> Vec<Arc<AvailabilityRecord>> {
        self.availability.refresh_all().await
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn availability(&self) -> &AvailabilityTracker {
        &self.availability
    }

    pub fn statuses(&self) -> Vec<AvailabilityStatus> {
        self.availability.statuses()
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    pub fn fallbacks(&self) -> &FallbackResolver {
        &self.fallbacks
    }

    pub fn invocation_timeout(&self) -> Duration {
        self.invocation_timeout
    }
}

/// Call the capability method that matches `task`
async fn call_capability(
    backend: &dyn Backend,
    task: TaskType,
    request: &AiRequest,
) -> Result<Value, BackendError> {
    match task {
        TaskType::ContentAnalysis => {
            backend
                .analyze_content(request.content.as_ref().unwrap_or(&Value::Null))
                .await
        }
        TaskType::Classification => backend.classify(&classification_input(request)).await,
        TaskType::RelationshipDetection => backend.detect_relationships(&request.entities).await,
        TaskType::ImageAnalysis => match &request.image {
            Some(image) => backend.analyze_image(image).await,
            None => backend.analyze_image(&ImageInput::default()).await,
        },
        TaskType::CreativeGeneration => {
            backend
                .generate_creative(request.creative.as_ref().unwrap_or(&Value::Null))
                .await
        }
    }
}

/// Classification sees the free-form params, or the whole request when
/// none were given
fn classification_input(request: &AiRequest) -> Value {
    if request.params.is_null() {
        serde_json::to_value(request).unwrap_or(Value::Null)
    } else {
        request.params.clone()
    }
}
