//! Structured observability events
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │    Router    │────▶│  Event Bus   │────▶│  Subscribers │
//! │  (publish)   │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! Every routing step publishes a [`RouterEvent`]: classification,
//! selection, availability checks and transitions, fallback hops, and the
//! final dispatch outcome. Events are mirrored by `tracing` logs; the bus
//! exists for programmatic consumers such as dashboards and tests.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::{DispatchId, RouterEvent};
