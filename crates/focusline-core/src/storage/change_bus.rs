//! Cross-context change notification.
//!
//! The [`ChangeBus`] carries "key X now holds value Y" notices between
//! execution contexts (one per tab, window, or process) that share a
//! [`KeyValueStore`](super::KeyValueStore). A context never receives its
//! own notices; a context created after a publish sees the value by
//! loading from the store instead.
//!
//! The bus is an explicit collaborator: clone it into every context that
//! should observe the others. Delivery is synchronous on the publisher's
//! thread, in subscription order, after the subscriber list lock has been
//! released, so handlers may publish or subscribe themselves.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Identifies one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a process-unique context id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A write observed in some other context. `value` is `None` when the key
/// was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub origin: ContextId,
    pub key: String,
    pub value: Option<String>,
}

type Handler = Arc<dyn Fn(&ChangeNotice) + Send + Sync>;

struct Subscriber {
    id: u64,
    context: ContextId,
    key: Option<String>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Process-wide publish/subscribe channel for store writes.
#[derive(Clone, Default)]
pub struct ChangeBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce that `key` now holds `value`, as written by `origin`.
    ///
    /// Returns the number of handlers that were invoked.
    pub fn publish(&self, origin: ContextId, key: &str, value: Option<&str>) -> usize {
        let notice = ChangeNotice {
            origin,
            key: key.to_string(),
            value: value.map(str::to_string),
        };
        let handlers: Vec<Handler> = self
            .inner
            .lock()
            .iter()
            .filter(|s| s.context != origin)
            .filter(|s| s.key.as_deref().map_or(true, |k| k == key))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in &handlers {
            handler(&notice);
        }
        tracing::trace!(key, %origin, delivered = handlers.len(), "change published");
        handlers.len()
    }

    /// Receive every notice not originating from `context`.
    pub fn subscribe<F>(&self, context: ContextId, handler: F) -> Subscription
    where
        F: Fn(&ChangeNotice) + Send + Sync + 'static,
    {
        self.add(context, None, Arc::new(handler))
    }

    /// Receive notices for a single key not originating from `context`.
    pub fn subscribe_key<F>(&self, context: ContextId, key: &str, handler: F) -> Subscription
    where
        F: Fn(&ChangeNotice) + Send + Sync + 'static,
    {
        self.add(context, Some(key.to_string()), Arc::new(handler))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }

    fn add(&self, context: ContextId, key: Option<String>, handler: Handler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().push(Subscriber {
            id,
            context,
            key,
            handler,
        });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }
}

/// Handle returned by [`ChangeBus::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().retain(|s| s.id != self.id);
        }
    }
}
