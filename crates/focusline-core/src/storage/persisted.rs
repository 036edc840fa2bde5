//! Typed, write-through, cross-context persisted values.
//!
//! A [`PersistedValue<T>`] binds one store key to one typed value:
//!
//! - loaded synchronously at construction (missing or corrupt data falls
//!   back to the default, corrupt data is logged);
//! - written through to the store on every update, then published in
//!   process through a `tokio::sync::watch` channel and to other contexts
//!   through the [`ChangeBus`];
//! - replaced wholesale when another context writes the same key
//!   (last writer wins at key granularity, no field merge).

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;

use super::change_bus::{ChangeBus, ContextId, Subscription};
use super::kv::KeyValueStore;
use crate::error::StorageError;

/// One execution context's view of the shared store: the store itself,
/// the bus connecting it to sibling contexts, and this context's id.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn KeyValueStore>,
    bus: ChangeBus,
    context: ContextId,
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("context", &self.context)
            .finish()
    }
}

impl StoreHandle {
    /// Open a new context over `store`, connected to the others on `bus`.
    pub fn new(store: Arc<dyn KeyValueStore>, bus: ChangeBus) -> Self {
        Self {
            store,
            bus,
            context: ContextId::next(),
        }
    }

    /// A second context on the same store and bus (another tab).
    pub fn sibling(&self) -> Self {
        Self::new(Arc::clone(&self.store), self.bus.clone())
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Bind `key` in this context.
    pub fn persisted<T>(&self, key: impl Into<String>, default: T) -> PersistedValue<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        PersistedValue::new(self.clone(), key, default)
    }
}

/// A typed value bound to one store key.
pub struct PersistedValue<T> {
    key: String,
    handle: StoreHandle,
    default: T,
    tx: Arc<watch::Sender<T>>,
    write_lock: Mutex<()>,
    _subscription: Subscription,
}

impl<T> fmt::Debug for PersistedValue<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedValue")
            .field("key", &self.key)
            .field("context", &self.handle.context)
            .field("value", &*self.tx.borrow())
            .finish()
    }
}

impl<T> PersistedValue<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(handle: StoreHandle, key: impl Into<String>, default: T) -> Self {
        let key = key.into();
        let initial = load_or_default(handle.store.as_ref(), &key, &default);
        let tx = Arc::new(watch::Sender::new(initial));

        let weak = Arc::downgrade(&tx);
        let fallback = default.clone();
        let subscription = handle
            .bus
            .subscribe_key(handle.context, &key, move |notice| {
                let Some(tx) = weak.upgrade() else { return };
                match &notice.value {
                    Some(raw) => match serde_json::from_str::<T>(raw) {
                        Ok(value) => {
                            tx.send_replace(value);
                        }
                        Err(e) => {
                            tracing::warn!(
                                key = %notice.key,
                                origin = %notice.origin,
                                error = %e,
                                "ignoring malformed cross-context value"
                            );
                        }
                    },
                    None => {
                        tx.send_replace(fallback.clone());
                    }
                }
            });

        Self {
            key,
            handle,
            default,
            tx,
            write_lock: Mutex::new(()),
            _subscription: subscription,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn context(&self) -> ContextId {
        self.handle.context
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Read the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// In-process change feed. Fires on local updates and on values
    /// adopted from other contexts.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Apply `f` to a copy of the current value and persist the result.
    ///
    /// The store write happens first; in-memory state and subscribers only
    /// see the new value once it is durable. Updates from one context are
    /// applied in call order.
    ///
    /// # Errors
    /// Returns the store error if the value cannot be persisted (for
    /// example when the medium's quota is exhausted). State is unchanged.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = self.tx.borrow().clone();
        let out = f(&mut next);
        self.commit(next)?;
        Ok(out)
    }

    /// Replace the value outright.
    pub fn set(&self, value: T) -> Result<(), StorageError> {
        self.update(move |slot| *slot = value)
    }

    /// Remove the key from the store and fall back to the default.
    pub fn clear(&self) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.handle.store.remove(&self.key)?;
        self.tx.send_replace(self.default.clone());
        self.handle.bus.publish(self.handle.context, &self.key, None);
        Ok(())
    }

    /// Re-read the key from the store, adopting whatever is there.
    ///
    /// Used to back-fill values whose first load was provisional.
    pub fn reload(&self) -> T {
        let value = load_or_default(self.handle.store.as_ref(), &self.key, &self.default);
        self.tx.send_replace(value.clone());
        value
    }

    fn commit(&self, next: T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&next).map_err(|source| StorageError::Serialize {
            key: self.key.clone(),
            source,
        })?;
        self.handle.store.set(&self.key, &raw)?;
        self.tx.send_replace(next);
        self.handle
            .bus
            .publish(self.handle.context, &self.key, Some(&raw));
        Ok(())
    }
}

fn load_or_default<T>(store: &dyn KeyValueStore, key: &str, default: &T) -> T
where
    T: DeserializeOwned + Clone,
{
    match store.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "corrupt persisted value, using default");
                default.clone()
            }
        },
        Ok(None) => default.clone(),
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to read persisted value, using default");
            default.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    struct Counter {
        count: u32,
        label: String,
    }

    fn handle() -> StoreHandle {
        StoreHandle::new(Arc::new(MemoryStore::new()), ChangeBus::new())
    }

    #[test]
    fn loads_default_when_missing() {
        let value = handle().persisted("counter", Counter::default());
        assert_eq!(value.get(), Counter::default());
    }

    #[test]
    fn update_writes_through() {
        let h = handle();
        let value = h.persisted("counter", Counter::default());
        let returned = value.update(|c| {
            c.count += 2;
            c.count
        });
        assert_eq!(returned.unwrap(), 2);

        let raw = h.store().get("counter").unwrap().unwrap();
        let stored: Counter = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.count, 2);

        let reopened = h.persisted("counter", Counter::default());
        assert_eq!(reopened.get().count, 2);
    }

    #[test]
    fn corrupt_value_falls_back_to_default() {
        let h = handle();
        h.store().set("counter", "{not json").unwrap();
        let value = h.persisted(
            "counter",
            Counter {
                count: 7,
                label: "fallback".into(),
            },
        );
        assert_eq!(value.get().count, 7);
    }

    #[test]
    fn sibling_context_adopts_writes() {
        let tab_a = handle();
        let tab_b = tab_a.sibling();
        let a = tab_a.persisted("counter", Counter::default());
        let b = tab_b.persisted("counter", Counter::default());

        a.update(|c| c.label = "from a".into()).unwrap();
        assert_eq!(b.get().label, "from a");

        // Whole-value replacement: b's own field edits are overwritten.
        b.update(|c| c.count = 10).unwrap();
        a.set(Counter {
            count: 1,
            label: "reset".into(),
        })
        .unwrap();
        assert_eq!(
            b.get(),
            Counter {
                count: 1,
                label: "reset".into()
            }
        );
    }

    #[test]
    fn clear_resets_every_context() {
        let tab_a = handle();
        let tab_b = tab_a.sibling();
        let a = tab_a.persisted("counter", Counter::default());
        let b = tab_b.persisted("counter", Counter::default());
        a.update(|c| c.count = 3).unwrap();
        a.clear().unwrap();
        assert_eq!(a.get(), Counter::default());
        assert_eq!(b.get(), Counter::default());
        assert!(tab_a.store().get("counter").unwrap().is_none());
    }

    #[test]
    fn failed_write_leaves_state_untouched() {
        let h = StoreHandle::new(Arc::new(MemoryStore::with_quota(40)), ChangeBus::new());
        let value = h.persisted("counter", Counter::default());
        value.update(|c| c.count = 1).unwrap();

        let err = value
            .update(|c| c.label = "x".repeat(64))
            .unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert_eq!(value.get().count, 1);
        assert!(value.get().label.is_empty());
    }

    #[test]
    fn subscribers_see_local_and_remote_changes() {
        let tab_a = handle();
        let tab_b = tab_a.sibling();
        let a = tab_a.persisted("counter", Counter::default());
        let b = tab_b.persisted("counter", Counter::default());
        let mut rx = b.subscribe();

        a.update(|c| c.count = 5).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().count, 5);

        b.update(|c| c.count = 6).unwrap();
        assert_eq!(rx.borrow_and_update().count, 6);
    }

    #[test]
    fn reload_backfills_from_store() {
        let h = handle();
        let value = h.persisted("counter", Counter::default());
        h.store()
            .set("counter", r#"{"count":9,"label":"late"}"#)
            .unwrap();
        assert_eq!(value.get().count, 0);
        assert_eq!(value.reload().count, 9);
        assert_eq!(value.get().label, "late");
    }
}
