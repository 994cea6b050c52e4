use crate::event::{EventCategory, ProgressEvent};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// Selects which events a subscriber receives. `None` on a dimension
/// means wildcard.
#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    task_ids: Option<HashSet<Uuid>>,
    categories: Option<HashSet<EventCategory>>,
}

impl StreamFilter {
    /// Match every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match only events carrying this task id.
    pub fn for_task(task_id: Uuid) -> Self {
        Self {
            task_ids: Some(HashSet::from([task_id])),
            categories: None,
        }
    }

    /// Match events carrying any of these task ids.
    pub fn for_tasks(task_ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            task_ids: Some(task_ids.into_iter().collect()),
            categories: None,
        }
    }

    /// Additionally restrict to the given categories.
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = EventCategory>) -> Self {
        self.categories = Some(categories.into_iter().collect());
        self
    }

    /// Whether this filter accepts the event.
    pub fn matches(&self, event: &ProgressEvent) -> bool {
        if let Some(ids) = &self.task_ids {
            match event.task_id {
                Some(id) if ids.contains(&id) => {}
                _ => return false,
            }
        }
        if let Some(cats) = &self.categories {
            if !cats.contains(&event.kind.category()) {
                return false;
            }
        }
        true
    }
}

/// Queue state shared between the bus (producer) and one stream handle
/// (consumer). Bounded; overflow drops the oldest queued event.
pub(crate) struct SubscriberQueue {
    queue: Mutex<VecDeque<ProgressEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a copy of the event, evicting the oldest entry when full.
    pub(crate) fn push(&self, event: ProgressEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut queue = self.queue.lock();
            if queue.len() == self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<ProgressEvent> {
        self.queue.lock().pop_front()
    }
}

/// An ordered FIFO handle onto the bus for one live subscriber.
///
/// Created by [`crate::ProgressBus::subscribe`]; detached with
/// [`crate::ProgressBus::unsubscribe`]. Holding or dropping a stream has
/// no effect on task execution or on other subscribers.
pub struct EventStream {
    id: Uuid,
    pub(crate) queue: Arc<SubscriberQueue>,
}

impl EventStream {
    pub(crate) fn new(id: Uuid, queue: Arc<SubscriberQueue>) -> Self {
        Self { id, queue }
    }

    /// Identifier used to detach this stream from the bus.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next matching event. Returns `None` once the stream
    /// is detached and its queue drained.
    pub async fn recv(&self) -> Option<ProgressEvent> {
        loop {
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return self.queue.pop();
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.queue.pop()
    }

    /// Events discarded because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }
}
