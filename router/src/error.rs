//! Error types for routing and backend calls

use std::time::Duration;
use thiserror::Error;

use crate::types::{BackendId, ErrorKind, TaskType};

/// Errors returned by a backend's probe or capability methods
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Backend returned status {0}")]
    Status(u16),

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{backend} does not support {task}")]
    Unsupported { backend: BackendId, task: TaskType },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request(_) => ErrorKind::Request,
            Self::Status(_) => ErrorKind::Status,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::InvalidResponse(_) => ErrorKind::InvalidResponse,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Errors surfaced to callers of [`crate::Router::dispatch`]
#[derive(Debug, Error)]
pub enum RouterError {
    /// Selection and the fallback walk found no available backend
    #[error("No available backend for {task_type} (tried: {})", format_tried(.tried))]
    NoBackendAvailable {
        task_type: TaskType,
        tried: Vec<BackendId>,
    },

    /// An available backend failed while executing the task
    #[error("{backend} failed {task_type} after {duration_ms}ms: {source}")]
    BackendInvocation {
        backend: BackendId,
        task_type: TaskType,
        duration_ms: u64,
        #[source]
        source: BackendError,
    },
}

impl RouterError {
    /// Backend that failed, if the error came from an invocation
    pub fn backend(&self) -> Option<BackendId> {
        match self {
            Self::NoBackendAvailable { .. } => None,
            Self::BackendInvocation { backend, .. } => Some(*backend),
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            Self::NoBackendAvailable { task_type, .. } => *task_type,
            Self::BackendInvocation { task_type, .. } => *task_type,
        }
    }
}

fn format_tried(tried: &[BackendId]) -> String {
    tried
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type for routing operations
pub type RouterResult<T> = Result<T, RouterError>;
