//! Dispatch latency and outcome aggregates
//!
//! Only running counters are kept; individual outcomes are folded in and
//! dropped. Recording never fails and never blocks on anything but a short
//! in-memory lock.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;
use tracing::debug;

use crate::error::BackendError;
use crate::types::{BackendId, DispatchOutcome, ErrorKind, TaskType};

#[derive(Debug, Default, Clone)]
struct BackendCounters {
    attempts: u64,
    successes: u64,
    failures: u64,
    total_latency_ms: u64,
    min_latency_ms: Option<u64>,
    max_latency_ms: u64,
    by_task: BTreeMap<TaskType, u64>,
    errors: BTreeMap<ErrorKind, u64>,
    last_error_kind: Option<ErrorKind>,
}

impl BackendCounters {
    fn observe(&mut self, outcome: &DispatchOutcome) {
        self.attempts += 1;
        self.total_latency_ms = self.total_latency_ms.saturating_add(outcome.duration_ms);
        self.min_latency_ms = Some(
            self.min_latency_ms
                .map_or(outcome.duration_ms, |m| m.min(outcome.duration_ms)),
        );
        self.max_latency_ms = self.max_latency_ms.max(outcome.duration_ms);
        *self.by_task.entry(outcome.task_type).or_insert(0) += 1;

        if outcome.success {
            self.successes += 1;
        } else {
            self.failures += 1;
            if let Some(kind) = outcome.error_kind {
                *self.errors.entry(kind).or_insert(0) += 1;
                self.last_error_kind = Some(kind);
            }
        }
    }

    fn to_metrics(&self) -> BackendMetrics {
        let attempts = self.attempts.max(1) as f64;
        BackendMetrics {
            attempts: self.attempts,
            successes: self.successes,
            failures: self.failures,
            avg_latency_ms: self.total_latency_ms as f64 / attempts,
            min_latency_ms: self.min_latency_ms.unwrap_or(0),
            max_latency_ms: self.max_latency_ms,
            success_rate: self.successes as f64 / attempts,
            by_task: self.by_task.clone(),
            errors: self.errors.clone(),
            last_error_kind: self.last_error_kind,
        }
    }
}

/// Aggregates for one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    /// Successes over attempts (0.0–1.0)
    pub success_rate: f64,
    pub by_task: BTreeMap<TaskType, u64>,
    pub errors: BTreeMap<ErrorKind, u64>,
    pub last_error_kind: Option<ErrorKind>,
}

/// Read-only view of everything recorded so far
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Backends with at least one recorded attempt
    pub backends: BTreeMap<BackendId, BackendMetrics>,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Requests that failed before reaching any backend
    pub unrouted: u64,
}

impl MetricsSnapshot {
    pub fn backend(&self, id: BackendId) -> Option<&BackendMetrics> {
        self.backends.get(&id)
    }

    pub fn attempts_for(&self, id: BackendId) -> u64 {
        self.backend(id).map(|m| m.attempts).unwrap_or(0)
    }
}

/// Result of a call wrapped by [`MetricsRecorder::observe`]
#[derive(Debug)]
pub struct Observed<T> {
    pub result: Result<T, BackendError>,
    pub outcome: DispatchOutcome,
}

/// Accumulates [`DispatchOutcome`]s into per-backend counters
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    counters: Mutex<HashMap<BackendId, BackendCounters>>,
    unrouted: AtomicU64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one outcome into the aggregates
    pub fn record(&self, outcome: &DispatchOutcome) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters
            .entry(outcome.backend)
            .or_default()
            .observe(outcome);
        debug!(
            backend = %outcome.backend,
            task = %outcome.task_type,
            duration_ms = outcome.duration_ms,
            success = outcome.success,
            "Dispatch outcome recorded"
        );
    }

    /// Count a request that never reached a backend
    pub fn record_unrouted(&self) {
        self.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    /// Run `call` against `backend`, timing it and recording the outcome
    pub async fn observe<T, F>(&self, backend: BackendId, task: TaskType, call: F) -> Observed<T>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let start = Instant::now();
        let result = call.await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match &result {
            Ok(_) => DispatchOutcome::succeeded(backend, task, duration_ms),
            Err(e) => DispatchOutcome::failed(backend, task, duration_ms, e.kind()),
        };
        self.record(&outcome);
        Observed { result, outcome }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let backends: BTreeMap<BackendId, BackendMetrics> = counters
            .iter()
            .map(|(id, c)| (*id, c.to_metrics()))
            .collect();

        MetricsSnapshot {
            total_attempts: backends.values().map(|m| m.attempts).sum(),
            total_successes: backends.values().map(|m| m.successes).sum(),
            total_failures: backends.values().map(|m| m.failures).sum(),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            backends,
        }
    }

    /// Drop all accumulated counters
    pub fn reset(&self) {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.unrouted.store(0, Ordering::Relaxed);
    }
}
