//! Router observability events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::router::selector::SelectionReason;
use crate::types::{BackendId, ErrorKind, TaskType};

/// Correlates all events emitted by a single dispatch
pub type DispatchId = String;

/// All events the router emits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterEvent {
    /// The classifier tagged a request
    TaskClassified {
        dispatch_id: DispatchId,
        task_type: TaskType,
        timestamp: DateTime<Utc>,
    },

    /// The selector picked a primary backend
    BackendSelected {
        dispatch_id: DispatchId,
        task_type: TaskType,
        backend: BackendId,
        reason: SelectionReason,
        timestamp: DateTime<Utc>,
    },

    /// A backend's availability was consulted during a dispatch
    AvailabilityChecked {
        dispatch_id: DispatchId,
        backend: BackendId,
        available: bool,
        timestamp: DateTime<Utc>,
    },

    /// A backend's cached availability flipped
    AvailabilityChanged {
        backend: BackendId,
        available: bool,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The dispatcher moved to a substitute backend
    FallbackTriggered {
        dispatch_id: DispatchId,
        task_type: TaskType,
        from: BackendId,
        to: BackendId,
        timestamp: DateTime<Utc>,
    },

    /// A backend completed the task
    DispatchCompleted {
        dispatch_id: DispatchId,
        task_type: TaskType,
        backend: BackendId,
        duration_ms: u64,
        fallback_hops: u32,
        timestamp: DateTime<Utc>,
    },

    /// The dispatch failed; `backend` is set when an invocation failed
    DispatchFailed {
        dispatch_id: DispatchId,
        task_type: TaskType,
        backend: Option<BackendId>,
        error_kind: Option<ErrorKind>,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl RouterEvent {
    /// Generate a new dispatch ID
    pub fn new_dispatch_id() -> DispatchId {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RouterEvent::TaskClassified { timestamp, .. } => *timestamp,
            RouterEvent::BackendSelected { timestamp, .. } => *timestamp,
            RouterEvent::AvailabilityChecked { timestamp, .. } => *timestamp,
            RouterEvent::AvailabilityChanged { timestamp, .. } => *timestamp,
            RouterEvent::FallbackTriggered { timestamp, .. } => *timestamp,
            RouterEvent::DispatchCompleted { timestamp, .. } => *timestamp,
            RouterEvent::DispatchFailed { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            RouterEvent::TaskClassified { .. } => "task_classified",
            RouterEvent::BackendSelected { .. } => "backend_selected",
            RouterEvent::AvailabilityChecked { .. } => "availability_checked",
            RouterEvent::AvailabilityChanged { .. } => "availability_changed",
            RouterEvent::FallbackTriggered { .. } => "fallback_triggered",
            RouterEvent::DispatchCompleted { .. } => "dispatch_completed",
            RouterEvent::DispatchFailed { .. } => "dispatch_failed",
        }
    }

    /// Dispatch this event belongs to, if any
    pub fn dispatch_id(&self) -> Option<&str> {
        match self {
            RouterEvent::TaskClassified { dispatch_id, .. } => Some(dispatch_id),
            RouterEvent::BackendSelected { dispatch_id, .. } => Some(dispatch_id),
            RouterEvent::AvailabilityChecked { dispatch_id, .. } => Some(dispatch_id),
            RouterEvent::FallbackTriggered { dispatch_id, .. } => Some(dispatch_id),
            RouterEvent::DispatchCompleted { dispatch_id, .. } => Some(dispatch_id),
            RouterEvent::DispatchFailed { dispatch_id, .. } => Some(dispatch_id),
            RouterEvent::AvailabilityChanged { .. } => None,
        }
    }

    /// Backend the event concerns, if any
    pub fn backend(&self) -> Option<BackendId> {
        match self {
            RouterEvent::BackendSelected { backend, .. } => Some(*backend),
            RouterEvent::AvailabilityChecked { backend, .. } => Some(*backend),
            RouterEvent::AvailabilityChanged { backend, .. } => Some(*backend),
            RouterEvent::FallbackTriggered { to, .. } => Some(*to),
            RouterEvent::DispatchCompleted { backend, .. } => Some(*backend),
            RouterEvent::DispatchFailed { backend, .. } => *backend,
            RouterEvent::TaskClassified { .. } => None,
        }
    }
}
