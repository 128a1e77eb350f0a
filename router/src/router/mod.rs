//! Request routing
//!
//! Classifies a request, picks a backend from the selection table, and
//! walks fallback chains when that backend is down.
//!
//! # Default Routing
//!
//! ```text
//! Task                 | Primary          | Override                  | Fallback chain
//! ---------------------|------------------|---------------------------|------------------------
//! content_analysis     | analysis_model   | hosted_llm (>=16k chars)  | hosted_llm
//! classification       | classifier_model | -                         | analysis_model → hosted_llm
//! relationship_detect. | analysis_model   | hosted_llm (complexity 4+)| hosted_llm
//! image_analysis       | vision_model     | -                         | hosted_llm
//! creative_generation  | hosted_llm       | -                         | -
//! ```

pub mod classifier;
pub mod dispatcher;
pub mod fallback;
pub mod selector;

pub use classifier::{Signal, TaskClassifier, DEFAULT_TASK, PRIORITY};
pub use dispatcher::{DispatchResult, Router, RouterBuilder, DEFAULT_INVOCATION_TIMEOUT};
pub use fallback::{ChainCycle, FallbackResolver, FallbackTable, TaskFallback};
pub use selector::{
    BackendSelector, Selection, SelectionOverride, SelectionReason, SelectionRule,
    SelectionTable, DEFAULT_BACKEND,
};
