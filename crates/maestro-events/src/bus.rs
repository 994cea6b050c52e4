use crate::event::{EventCategory, EventKind, EventPriority, ProgressEvent};
use crate::stream::{EventStream, StreamFilter, SubscriberQueue};
use chrono::Utc;
use maestro_core::MaestroResult;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

/// A registered event callback. Errors are logged, never propagated to
/// the emitter. Async consumers should subscribe to a stream instead.
pub type EventCallback = Arc<dyn Fn(&ProgressEvent) -> MaestroResult<()> + Send + Sync>;

const DEFAULT_BUFFER_CAPACITY: usize = 1_024;
const DEFAULT_STREAM_CAPACITY: usize = 256;

struct Subscriber {
    id: Uuid,
    filter: StreamFilter,
    queue: Arc<SubscriberQueue>,
}

struct BusState {
    buffer: VecDeque<ProgressEvent>,
    subscribers: Vec<Subscriber>,
    callbacks: HashMap<EventKind, Vec<EventCallback>>,
    wildcard: Vec<EventCallback>,
    counts: HashMap<EventCategory, u64>,
    sequence: u64,
}

/// Point-in-time bus statistics.
#[derive(Debug, Clone)]
pub struct BusStats {
    /// Emitted events per category since construction.
    pub events_by_category: HashMap<EventCategory, u64>,
    /// Total events emitted.
    pub total_events: u64,
    /// Time since the bus was created.
    pub uptime: Duration,
    /// Currently attached subscriber streams.
    pub active_subscribers: usize,
    /// Events currently held in the ring buffer.
    pub buffer_len: usize,
    /// Ring buffer capacity.
    pub buffer_capacity: usize,
}

/// The progress event bus.
///
/// Emission assigns the sequence number, appends to the ring buffer, and
/// fans out to subscriber queues under one lock, which is what makes the
/// per-subscriber ordering guarantee hold. Callbacks run after the lock
/// is released (in registration order, exact kind before wildcard), so a
/// callback may itself emit without deadlocking.
pub struct ProgressBus {
    state: Mutex<BusState>,
    buffer_capacity: usize,
    stream_capacity: usize,
    started_at: Instant,
}

impl ProgressBus {
    /// Bus with default buffer and per-stream capacities.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY, DEFAULT_STREAM_CAPACITY)
    }

    /// Bus with explicit ring buffer and subscriber queue capacities.
    pub fn with_capacity(buffer_capacity: usize, stream_capacity: usize) -> Self {
        Self {
            state: Mutex::new(BusState {
                buffer: VecDeque::with_capacity(buffer_capacity),
                subscribers: Vec::new(),
                callbacks: HashMap::new(),
                wildcard: Vec::new(),
                counts: HashMap::new(),
                sequence: 0,
            }),
            buffer_capacity,
            stream_capacity,
            started_at: Instant::now(),
        }
    }

    /// Emit an event. Returns its sequence number.
    pub fn emit(
        &self,
        kind: EventKind,
        data: serde_json::Value,
        priority: EventPriority,
        agent_id: Option<String>,
        task_id: Option<Uuid>,
    ) -> u64 {
        let (event, to_invoke) = {
            let mut state = self.state.lock();
            state.sequence += 1;
            let event = ProgressEvent {
                sequence: state.sequence,
                kind,
                data,
                priority,
                agent_id,
                task_id,
                timestamp: Utc::now(),
            };

            if state.buffer.len() == self.buffer_capacity {
                state.buffer.pop_front();
            }
            state.buffer.push_back(event.clone());
            *state.counts.entry(kind.category()).or_insert(0) += 1;

            for sub in &state.subscribers {
                if sub.filter.matches(&event) {
                    sub.queue.push(event.clone());
                }
            }

            let mut to_invoke: Vec<EventCallback> = Vec::new();
            if let Some(exact) = state.callbacks.get(&kind) {
                to_invoke.extend(exact.iter().cloned());
            }
            to_invoke.extend(state.wildcard.iter().cloned());
            (event, to_invoke)
        };

        for callback in to_invoke {
            if let Err(e) = callback(&event) {
                warn!(sequence = event.sequence, error = %e, "Event callback failed");
            }
        }

        event.sequence
    }

    /// Register a callback for one exact event kind.
    pub fn on(&self, kind: EventKind, callback: EventCallback) {
        self.state.lock().callbacks.entry(kind).or_default().push(callback);
    }

    /// Register a wildcard callback consulted on every emission.
    pub fn on_any(&self, callback: EventCallback) {
        self.state.lock().wildcard.push(callback);
    }

    /// Attach a new subscriber stream. The stream receives every
    /// subsequent matching event until [`Self::unsubscribe`].
    pub fn subscribe(&self, filter: StreamFilter) -> EventStream {
        let id = Uuid::new_v4();
        let queue = Arc::new(SubscriberQueue::new(self.stream_capacity));
        self.state.lock().subscribers.push(Subscriber {
            id,
            filter,
            queue: queue.clone(),
        });
        EventStream::new(id, queue)
    }

    /// Detach a subscriber. No effect on other subscribers or on
    /// emitters; the stream's `recv` drains whatever is queued, then
    /// returns `None`.
    pub fn unsubscribe(&self, stream_id: Uuid) {
        let mut state = self.state.lock();
        if let Some(pos) = state.subscribers.iter().position(|s| s.id == stream_id) {
            let sub = state.subscribers.swap_remove(pos);
            sub.queue.close();
        }
    }

    /// Most recent `limit` buffered events matching the category
    /// filter, oldest first (newest-last).
    pub fn recent(&self, filter: Option<EventCategory>, limit: usize) -> Vec<ProgressEvent> {
        let state = self.state.lock();
        let mut matching: Vec<ProgressEvent> = state
            .buffer
            .iter()
            .rev()
            .filter(|e| filter.map_or(true, |c| e.kind.category() == c))
            .take(limit)
            .cloned()
            .collect();
        matching.reverse();
        matching
    }

    /// Current bus statistics.
    pub fn stats(&self) -> BusStats {
        let state = self.state.lock();
        BusStats {
            events_by_category: state.counts.clone(),
            total_events: state.sequence,
            uptime: self.started_at.elapsed(),
            active_subscribers: state.subscribers.len(),
            buffer_len: state.buffer.len(),
            buffer_capacity: self.buffer_capacity,
        }
    }

    /// Number of currently attached subscriber streams.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}
