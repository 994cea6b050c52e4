//! Typed, ordered progress event bus with bounded history and live
//! multi-subscriber push streams.
//!
//! Every emission gets a monotonically increasing sequence number, lands
//! in a fixed-capacity ring buffer, fires registered callbacks (exact
//! kind first, wildcard second), and is copied into every matching
//! subscriber queue. Each subscriber sees events in emission order; no
//! ordering is guaranteed *across* distinct subscribers.
//!
//! # Main types
//!
//! - [`ProgressBus`] — The bus: emit, register callbacks, subscribe.
//! - [`ProgressEvent`] — One immutable, sequence-numbered event.
//! - [`EventKind`] / [`EventCategory`] — Two-level event taxonomy.
//! - [`EventStream`] — Bounded FIFO handle for one live subscriber.

/// The event bus itself.
pub mod bus;
/// Event taxonomy and the event record.
pub mod event;
/// Subscriber streams and filters.
pub mod stream;

pub use bus::{BusStats, EventCallback, ProgressBus};
pub use event::{
    AgentEvent, EventCategory, EventKind, EventPriority, LlmEvent, LogEvent, MetricEvent,
    ProgressEvent, TaskEvent, WorkflowEvent,
};
pub use stream::{EventStream, StreamFilter};
