//! # Core Engine Module
//!
//! This module forms the heart of the telemetry hub. It aggregates the
//! components that decide who is listening, what gets polled, and when:
//!
//! - **`topics`**: topic and metric-class declarations plus the
//!   `MetricProducer` seam every data source implements.
//! - **`cache`**: the tiered cache. One entry per metric class per topic, each
//!   with its own TTL, with concurrent misses collapsed into a single producer call.
//! - **`registry`**: room membership per topic and the cancellation token that
//!   owns the topic's polling timers.
//! - **`dispatcher`**: the per-connection outbound queues and the fan-out that
//!   writes one shared frame into every member's queue.
//! - **`poller`**: the tick algorithm and the per-class timer loops.
//! - **`lifecycle`**: starts timers on the first join, tears them down (and purges
//!   the cache) on the last leave.
//! - **`model`**: the JSON wire model spoken over the socket.
//!
//! Every registry is an explicitly owned object shared through `Arc`; nothing
//! here lives in a static, so each test can build a fresh hub.

/// Topic and metric-class declarations and the producer seam.
pub mod topics;
/// Per-metric-class snapshot cache with independent TTLs.
pub mod cache;
/// Room membership and polling ownership per topic.
pub mod registry;
/// Outbound queues and fan-out to connections.
pub mod dispatcher;
/// Scheduled and one-shot polling of metric classes.
pub mod poller;
/// Lazy start and atomic teardown of topic polling.
pub mod lifecycle;
/// Client and server wire messages.
pub mod model;

// --- Public API Re-exports ---
pub use cache::{CacheEntry, ReadMode, TieredCache};
pub use dispatcher::{ConnectionId, Dispatcher};
pub use lifecycle::{HubError, JoinResult, LifecycleController, PollingTimer};
pub use model::{ClientMessage, ServerMessage};
pub use poller::{MergedRead, TickOutcome, TieredPoller};
pub use registry::{ChannelRegistry, JoinOutcome, LeaveOutcome};
pub use topics::{MetricClassSpec, MetricProducer, ProducerError, TopicCatalog, TopicSpec};
