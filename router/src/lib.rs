//! AI Model Router
//!
//! Accepts abstract AI task requests and dispatches each one to one of
//! several model backends:
//!
//! - a hosted general-purpose LLM API
//! - a self-hosted content analysis model
//! - a self-hosted classification model
//! - a vision model
//!
//! # Flow
//!
//! ```text
//! AiRequest ─→ TaskClassifier ─→ BackendSelector ─→ AvailabilityTracker ─┬─→ Backend ─→ MetricsRecorder
//!                                                          ▲             │
//!                                                          └─ Fallback ──┘ (unavailable)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use model_router::{AiRequest, Router, RouterConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = RouterConfig::from_file("router.toml")?;
//! let router = Router::from_config(&config, config.build_registry()?);
//!
//! let result = router
//!     .dispatch(&AiRequest::new().with_content("a post to analyze"))
//!     .await?;
//! println!("{} answered in {}ms", result.backend, result.duration_ms);
//! # Ok(())
//! # }
//! ```

pub mod availability;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod types;

pub use availability::{AvailabilityRecord, AvailabilityStatus, AvailabilityTracker};
pub use config::{ConfigError, ConfigIssue, RouterConfig};
pub use error::{BackendError, RouterError, RouterResult};
pub use events::{EventBus, EventBusExt, EventFilter, RouterEvent, SharedEventBus};
pub use metrics::{BackendMetrics, MetricsRecorder, MetricsSnapshot};
pub use registry::{Backend, BackendRegistry, HttpBackend, HttpBackendConfig, ProbeReport};
pub use router::{DispatchResult, Router, RouterBuilder};
pub use types::{AiRequest, BackendId, DispatchOptions, DispatchOutcome, ErrorKind, ImageInput, TaskType};
