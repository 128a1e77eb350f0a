//! Task classification from declared request fields.
//!
//! Runs BEFORE backend selection. Classification is total: every request
//! maps to exactly one [`TaskType`].
//!
//! # Priority table
//!
//! ```text
//! Priority | Signal              | Task type
//! ---------|---------------------|------------------------
//! 1        | image payload       | image_analysis
//! 2        | creative bundle     | creative_generation
//! 3        | >= 2 entities       | relationship_detection
//! 4        | non-null content    | content_analysis
//! -        | (none)              | classification
//! ```
//!
//! Requests routinely carry several signals at once (a post with an image
//! and a caption, a creative brief that quotes existing content). The first
//! matching row wins, so an image with a creative bundle is an image task.

use serde::{Deserialize, Serialize};

use crate::types::{AiRequest, TaskType};

/// A request feature that implies a task type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Image,
    Creative,
    Entities,
    Content,
}

impl Signal {
    /// Whether the request carries this signal
    pub fn present_in(&self, request: &AiRequest) -> bool {
        match self {
            Self::Image => request.image.is_some(),
            Self::Creative => request.creative.as_ref().is_some_and(|c| !c.is_null()),
            Self::Entities => request.entities.len() >= 2,
            Self::Content => request.has_content(),
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Image => TaskType::ImageAnalysis,
            Self::Creative => TaskType::CreativeGeneration,
            Self::Entities => TaskType::RelationshipDetection,
            Self::Content => TaskType::ContentAnalysis,
        }
    }
}

/// Signals in precedence order; first match wins
pub const PRIORITY: [Signal; 4] = [
    Signal::Image,
    Signal::Creative,
    Signal::Entities,
    Signal::Content,
];

/// Task type when no signal matches
pub const DEFAULT_TASK: TaskType = TaskType::Classification;

/// Maps requests to task types using [`PRIORITY`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskClassifier;

impl TaskClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, request: &AiRequest) -> TaskType {
        PRIORITY
            .iter()
            .find(|signal| signal.present_in(request))
            .map(Signal::task_type)
            .unwrap_or(DEFAULT_TASK)
    }

    /// Every signal present in the request, in priority order.
    ///
    /// Useful for logging requests that matched more than one row.
    pub fn signals(&self, request: &AiRequest) -> Vec<Signal> {
        PRIORITY
            .iter()
            .copied()
            .filter(|signal| signal.present_in(request))
            .collect()
    }
}
