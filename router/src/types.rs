//! Core routing types
//!
//! Task and backend identifiers, the inbound request shape, and the
//! immutable outcome record produced for every dispatch attempt.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of AI work a request needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Analyze a piece of creator content
    ContentAnalysis,
    /// Label or categorize an input
    Classification,
    /// Find relationships between several entities
    RelationshipDetection,
    /// Describe or inspect an image
    ImageAnalysis,
    /// Produce new creative copy
    CreativeGeneration,
}

impl TaskType {
    pub fn all() -> &'static [TaskType] {
        &[
            TaskType::ContentAnalysis,
            TaskType::Classification,
            TaskType::RelationshipDetection,
            TaskType::ImageAnalysis,
            TaskType::CreativeGeneration,
        ]
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContentAnalysis => write!(f, "content_analysis"),
            Self::Classification => write!(f, "classification"),
            Self::RelationshipDetection => write!(f, "relationship_detection"),
            Self::ImageAnalysis => write!(f, "image_analysis"),
            Self::CreativeGeneration => write!(f, "creative_generation"),
        }
    }
}

/// Model backend identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendId {
    /// Hosted general-purpose LLM API
    HostedLlm,
    /// Self-hosted content analysis model
    AnalysisModel,
    /// Self-hosted classification model
    ClassifierModel,
    /// Vision model
    VisionModel,
}

impl BackendId {
    pub fn all() -> &'static [BackendId] {
        &[
            BackendId::HostedLlm,
            BackendId::AnalysisModel,
            BackendId::ClassifierModel,
            BackendId::VisionModel,
        ]
    }
}

impl std::fmt::Display for BackendId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostedLlm => write!(f, "hosted_llm"),
            Self::AnalysisModel => write!(f, "analysis_model"),
            Self::ClassifierModel => write!(f, "classifier_model"),
            Self::VisionModel => write!(f, "vision_model"),
        }
    }
}

/// Image payload carried by a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageInput {
    /// Remote image location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base64-encoded image bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Optional instruction for the vision model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Caller-supplied routing options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchOptions {
    /// Explicit backend override; honored only if registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendId>,
    /// Caller's complexity estimate (1-5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u8>,
}

impl DispatchOptions {
    pub fn with_backend(mut self, backend: BackendId) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = Some(complexity.clamp(1, 5));
        self
    }
}

/// An abstract AI task request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiRequest {
    /// Primary content (text or structured object)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Image payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInput>,
    /// Creative generation parameter bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creative: Option<Value>,
    /// Entities to relate to one another
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Value>,
    /// Free-form parameters passed through to classification
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default)]
    pub options: DispatchOptions,
}

impl AiRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(mut self, content: impl Into<Value>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_creative(mut self, creative: impl Into<Value>) -> Self {
        self.creative = Some(creative.into());
        self
    }

    pub fn with_entities(mut self, entities: Vec<Value>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_params(mut self, params: impl Into<Value>) -> Self {
        self.params = params.into();
        self
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether the request carries non-null primary content
    pub fn has_content(&self) -> bool {
        self.content.as_ref().is_some_and(|c| !c.is_null())
    }

    /// Size of the primary content in characters.
    ///
    /// Strings count their characters; structured content counts its
    /// serialized JSON length.
    pub fn content_chars(&self) -> usize {
        match &self.content {
            None | Some(Value::Null) => 0,
            Some(Value::String(s)) => s.chars().count(),
            Some(other) => other.to_string().chars().count(),
        }
    }
}

/// Coarse category of a failed dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Request,
    Status,
    Timeout,
    Unsupported,
    InvalidResponse,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Status => write!(f, "status"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::InvalidResponse => write!(f, "invalid_response"),
        }
    }
}

/// Result of one completed dispatch attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub backend: BackendId,
    pub task_type: TaskType,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl DispatchOutcome {
    pub fn succeeded(backend: BackendId, task_type: TaskType, duration_ms: u64) -> Self {
        Self {
            backend,
            task_type,
            duration_ms,
            success: true,
            error_kind: None,
        }
    }

    pub fn failed(
        backend: BackendId,
        task_type: TaskType,
        duration_ms: u64,
        error_kind: ErrorKind,
    ) -> Self {
        Self {
            backend,
            task_type,
            duration_ms,
            success: false,
            error_kind: Some(error_kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_type_display_matches_serde() {
        for &task in TaskType::all() {
            let json = serde_json::to_string(&task).unwrap();
            assert_eq!(json, format!("\"{}\"", task));
        }
    }

    #[test]
    fn test_backend_id_display_matches_serde() {
        for &backend in BackendId::all() {
            let json = serde_json::to_string(&backend).unwrap();
            assert_eq!(json, format!("\"{}\"", backend));
        }
    }

    #[test]
    fn test_content_chars() {
        assert_eq!(AiRequest::new().content_chars(), 0);
        assert_eq!(AiRequest::new().with_content("héllo").content_chars(), 5);
        let structured = AiRequest::new().with_content(json!({"a": 1}));
        assert_eq!(structured.content_chars(), r#"{"a":1}"#.len());
    }

    #[test]
    fn test_null_content_is_absent() {
        let req = AiRequest::new().with_content(Value::Null);
        assert!(!req.has_content());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: AiRequest = serde_json::from_str(
            r#"{"content": "post body", "options": {"backend": "vision_model"}}"#,
        )
        .unwrap();
        assert!(req.has_content());
        assert!(req.entities.is_empty());
        assert!(req.params.is_null());
        assert_eq!(req.options.backend, Some(BackendId::VisionModel));
    }

    #[test]
    fn test_complexity_is_clamped() {
        let opts = DispatchOptions::default().with_complexity(9);
        assert_eq!(opts.complexity, Some(5));
    }
}
