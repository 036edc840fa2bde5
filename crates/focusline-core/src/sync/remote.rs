//! Remote collection boundary and the owner-scoped client cache.
//!
//! [`RemoteCollection`] is the generic CRUD service the core talks to.
//! [`RemoteCollectionClient`] wraps one with a cache of the last listing for
//! the current owner, which doubles as the "remote shadow" that optimistic
//! updates are applied to.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::RemoteError;
use crate::principal::PrincipalId;
use crate::record::{Entity, NewRecord, Record, RecordId, RemoteId};

/// Default staleness window for cached listings.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);

/// CRUD service for one entity type, keyed by record id and owner id.
#[async_trait]
pub trait RemoteCollection<E: Entity>: Send + Sync {
    /// All records owned by `owner`.
    async fn list(&self, owner: &PrincipalId) -> Result<Vec<Record<E>>, RemoteError>;

    /// Store a new record; the remote assigns its id.
    async fn create(&self, record: NewRecord<E>) -> Result<Record<E>, RemoteError>;

    async fn update(&self, id: &RemoteId, patch: &E::Patch) -> Result<Record<E>, RemoteError>;

    async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError>;
}

struct Cache<E> {
    owner: Option<PrincipalId>,
    records: Vec<Record<E>>,
    fetched_at: Option<Instant>,
    /// Bumped on every [`reset`](RemoteCollectionClient::reset); a listing
    /// started under an older generation is never stored.
    generation: u64,
}

impl<E> Default for Cache<E> {
    fn default() -> Self {
        Self {
            owner: None,
            records: Vec::new(),
            fetched_at: None,
            generation: 0,
        }
    }
}

/// A remote collection plus the cached listing for the current owner.
pub struct RemoteCollectionClient<E: Entity> {
    backend: Arc<dyn RemoteCollection<E>>,
    cache: Arc<Mutex<Cache<E>>>,
    stale_after: Duration,
}

impl<E: Entity> Clone for RemoteCollectionClient<E> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            cache: Arc::clone(&self.cache),
            stale_after: self.stale_after,
        }
    }
}

impl<E: Entity> fmt::Debug for RemoteCollectionClient<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.lock();
        f.debug_struct("RemoteCollectionClient")
            .field("collection", &E::COLLECTION)
            .field("owner", &cache.owner)
            .field("cached", &cache.records.len())
            .finish()
    }
}

impl<E: Entity> RemoteCollectionClient<E> {
    pub fn new(backend: Arc<dyn RemoteCollection<E>>) -> Self {
        Self::with_stale_after(backend, DEFAULT_STALE_AFTER)
    }

    pub fn with_stale_after(backend: Arc<dyn RemoteCollection<E>>, stale_after: Duration) -> Self {
        Self {
            backend,
            cache: Arc::new(Mutex::new(Cache::default())),
            stale_after,
        }
    }

    /// Listing for `owner`, served from cache while fresh unless `force`.
    pub async fn fetch(&self, owner: &PrincipalId, force: bool) -> Result<Vec<Record<E>>, RemoteError> {
        let generation = {
            let cache = self.lock();
            let fresh = cache
                .fetched_at
                .is_some_and(|at| at.elapsed() < self.stale_after);
            if !force && fresh && cache.owner.as_ref() == Some(owner) {
                return Ok(cache.records.clone());
            }
            cache.generation
        };

        let records = self.backend.list(owner).await?;
        let mut cache = self.lock();
        let same_scope = cache.generation == generation
            && cache.owner.as_ref().map_or(true, |current| current == owner);
        if same_scope {
            cache.owner = Some(owner.clone());
            cache.records = records.clone();
            cache.fetched_at = Some(Instant::now());
        } else {
            tracing::debug!(collection = E::COLLECTION, %owner, "discarding listing from a previous scope");
        }
        Ok(records)
    }

    /// Last known remote records for the current owner.
    pub fn cached(&self) -> Vec<Record<E>> {
        self.lock().records.clone()
    }

    /// Cached records, or nothing when the cache is scoped to anyone but
    /// `owner`.
    pub fn cached_for(&self, owner: Option<&PrincipalId>) -> Vec<Record<E>> {
        let cache = self.lock();
        if cache.owner.as_ref() == owner {
            cache.records.clone()
        } else {
            Vec::new()
        }
    }

    pub fn owner(&self) -> Option<PrincipalId> {
        self.lock().owner.clone()
    }

    pub fn cached_record(&self, id: &RemoteId) -> Option<Record<E>> {
        let target = RecordId::Remote(id.clone());
        self.lock().records.iter().find(|r| r.id == target).cloned()
    }

    /// Insert or replace a record in the shadow.
    pub fn upsert_cached(&self, record: Record<E>) {
        let mut cache = self.lock();
        match cache.records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => cache.records.push(record),
        }
    }

    /// Apply a patch to the shadow copy of `id`, if cached.
    pub fn patch_cached(&self, id: &RemoteId, patch: &E::Patch) -> Option<Record<E>> {
        let target = RecordId::Remote(id.clone());
        let mut cache = self.lock();
        let record = cache.records.iter_mut().find(|r| r.id == target)?;
        record.apply(patch, Utc::now());
        Some(record.clone())
    }

    pub fn remove_cached(&self, id: &RemoteId) -> Option<Record<E>> {
        let target = RecordId::Remote(id.clone());
        let mut cache = self.lock();
        let index = cache.records.iter().position(|r| r.id == target)?;
        Some(cache.records.remove(index))
    }

    /// Mark the listing stale; the next `fetch` goes to the remote.
    pub fn invalidate(&self) {
        self.lock().fetched_at = None;
    }

    /// Drop everything cached and scope the cache to `owner`.
    pub fn reset(&self, owner: Option<PrincipalId>) {
        let mut cache = self.lock();
        let generation = cache.generation.wrapping_add(1);
        *cache = Cache {
            owner,
            generation,
            ..Cache::default()
        };
    }

    pub async fn create(&self, record: NewRecord<E>) -> Result<Record<E>, RemoteError> {
        self.backend.create(record).await
    }

    pub async fn update(&self, id: &RemoteId, patch: &E::Patch) -> Result<Record<E>, RemoteError> {
        self.backend.update(id, patch).await
    }

    pub async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError> {
        self.backend.delete(id).await
    }

    fn lock(&self) -> MutexGuard<'_, Cache<E>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── In-memory remote ─────────────────────────────────────────────────

/// Call counters of an [`InMemoryRemote`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

struct InMemoryState<E> {
    records: Vec<Record<E>>,
    next_id: u64,
    failing: bool,
    calls: CallCounts,
}

/// A remote store held in memory. Assigns ids `remote_<n>`; can be
/// switched into a failing mode to model an unreachable network.
pub struct InMemoryRemote<E> {
    state: Mutex<InMemoryState<E>>,
}

impl<E: Entity> Default for InMemoryRemote<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> InMemoryRemote<E> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                records: Vec::new(),
                next_id: 1,
                failing: false,
                calls: CallCounts::default(),
            }),
        }
    }

    /// While failing, every call returns [`RemoteError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    pub fn records(&self) -> Vec<Record<E>> {
        self.lock().records.clone()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unreachable_err() -> RemoteError {
    RemoteError::Unavailable("remote store unreachable".to_string())
}

#[async_trait]
impl<E: Entity> RemoteCollection<E> for InMemoryRemote<E> {
    async fn list(&self, owner: &PrincipalId) -> Result<Vec<Record<E>>, RemoteError> {
        let mut state = self.lock();
        state.calls.list += 1;
        if state.failing {
            return Err(unreachable_err());
        }
        Ok(state
            .records
            .iter()
            .filter(|r| r.owner_id.as_ref() == Some(owner))
            .cloned()
            .collect())
    }

    async fn create(&self, record: NewRecord<E>) -> Result<Record<E>, RemoteError> {
        let mut state = self.lock();
        state.calls.create += 1;
        if state.failing {
            return Err(unreachable_err());
        }
        if record.owner_id.is_none() {
            return Err(RemoteError::NotAuthenticated);
        }
        record
            .fields
            .validate()
            .map_err(|e| RemoteError::Validation(e.to_string()))?;
        let id = RemoteId::new(format!("remote_{}", state.next_id));
        state.next_id += 1;
        let created = record.with_id(id);
        state.records.push(created.clone());
        Ok(created)
    }

    async fn update(&self, id: &RemoteId, patch: &E::Patch) -> Result<Record<E>, RemoteError> {
        let mut state = self.lock();
        state.calls.update += 1;
        if state.failing {
            return Err(unreachable_err());
        }
        let target = RecordId::Remote(id.clone());
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == target)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        record.apply(patch, Utc::now());
        Ok(record.clone())
    }

    async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.delete += 1;
        if state.failing {
            return Err(unreachable_err());
        }
        let target = RecordId::Remote(id.clone());
        let before = state.records.len();
        state.records.retain(|r| r.id != target);
        if state.records.len() == before {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

/// The remote used when none is configured: every call fails, so every
/// record stays local-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

#[async_trait]
impl<E: Entity> RemoteCollection<E> for OfflineRemote {
    async fn list(&self, _owner: &PrincipalId) -> Result<Vec<Record<E>>, RemoteError> {
        Err(offline())
    }

    async fn create(&self, _record: NewRecord<E>) -> Result<Record<E>, RemoteError> {
        Err(offline())
    }

    async fn update(&self, _id: &RemoteId, _patch: &E::Patch) -> Result<Record<E>, RemoteError> {
        Err(offline())
    }

    async fn delete(&self, _id: &RemoteId) -> Result<(), RemoteError> {
        Err(offline())
    }
}

fn offline() -> RemoteError {
    RemoteError::Unavailable("no remote store configured".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Task, TaskPatch};

    fn new_task(title: &str, owner: &str) -> NewRecord<Task> {
        Record::new_local(Task::new(title), Some(PrincipalId::new(owner)), Utc::now()).to_new()
    }

    #[tokio::test]
    async fn in_memory_assigns_ids_and_filters_by_owner() {
        let remote = InMemoryRemote::<Task>::new();
        let a = remote.create(new_task("A", "u1")).await.unwrap();
        remote.create(new_task("B", "u2")).await.unwrap();
        assert_eq!(a.id, RecordId::Remote(RemoteId::new("remote_1")));

        let listed = remote.list(&PrincipalId::new("u1")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].fields.title, "A");
    }

    #[tokio::test]
    async fn in_memory_rejects_invalid_and_anonymous_records() {
        let remote = InMemoryRemote::<Task>::new();
        let err = remote.create(new_task(" ", "u1")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Validation(_)));

        let anonymous = Record::new_local(Task::new("A"), None, Utc::now()).to_new();
        let err = remote.create(anonymous).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotAuthenticated));
    }

    #[tokio::test]
    async fn client_serves_fresh_cache_and_refetches_when_forced() {
        let backend = Arc::new(InMemoryRemote::<Task>::new());
        backend.create(new_task("A", "u1")).await.unwrap();
        let client = RemoteCollectionClient::new(backend.clone());
        let owner = PrincipalId::new("u1");

        client.fetch(&owner, false).await.unwrap();
        client.fetch(&owner, false).await.unwrap();
        assert_eq!(backend.calls().list, 1);

        client.fetch(&owner, true).await.unwrap();
        assert_eq!(backend.calls().list, 2);

        client.invalidate();
        client.fetch(&owner, false).await.unwrap();
        assert_eq!(backend.calls().list, 3);
    }

    #[tokio::test]
    async fn client_shadow_edits() {
        let backend = Arc::new(InMemoryRemote::<Task>::new());
        let created = backend.create(new_task("A", "u1")).await.unwrap();
        let client = RemoteCollectionClient::new(backend);
        client.fetch(&PrincipalId::new("u1"), false).await.unwrap();

        let id = created.id.as_remote().unwrap().clone();
        let patch = TaskPatch {
            completed: Some(true),
            ..Default::default()
        };
        let patched = client.patch_cached(&id, &patch).unwrap();
        assert!(patched.fields.completed);
        assert!(client.cached_record(&id).unwrap().fields.completed);

        assert!(client.remove_cached(&id).is_some());
        assert!(client.cached().is_empty());
    }

    #[tokio::test]
    async fn reset_scopes_cache_to_new_owner() {
        let backend = Arc::new(InMemoryRemote::<Task>::new());
        backend.create(new_task("A", "u1")).await.unwrap();
        let client = RemoteCollectionClient::new(backend);
        client.fetch(&PrincipalId::new("u1"), false).await.unwrap();
        assert_eq!(client.cached().len(), 1);

        client.reset(Some(PrincipalId::new("u2")));
        assert!(client.cached().is_empty());
        let listed = client.fetch(&PrincipalId::new("u2"), false).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn cached_for_ignores_other_owners() {
        let backend = Arc::new(InMemoryRemote::<Task>::new());
        backend.create(new_task("A", "u1")).await.unwrap();
        let client = RemoteCollectionClient::new(backend);
        let u1 = PrincipalId::new("u1");
        client.fetch(&u1, false).await.unwrap();

        assert_eq!(client.owner(), Some(u1.clone()));
        assert_eq!(client.cached_for(Some(&u1)).len(), 1);
        assert!(client.cached_for(None).is_empty());
        assert!(client.cached_for(Some(&PrincipalId::new("u2"))).is_empty());
    }

    /// Lists only once released.
    struct SlowList {
        inner: InMemoryRemote<Task>,
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl RemoteCollection<Task> for SlowList {
        async fn list(&self, owner: &PrincipalId) -> Result<Vec<Record<Task>>, RemoteError> {
            self.gate.notified().await;
            self.inner.list(owner).await
        }

        async fn create(&self, record: NewRecord<Task>) -> Result<Record<Task>, RemoteError> {
            self.inner.create(record).await
        }

        async fn update(&self, id: &RemoteId, patch: &TaskPatch) -> Result<Record<Task>, RemoteError> {
            self.inner.update(id, patch).await
        }

        async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn listing_that_outlives_a_reset_is_not_stored() {
        let backend = Arc::new(SlowList {
            inner: InMemoryRemote::new(),
            gate: tokio::sync::Notify::new(),
        });
        backend.inner.create(new_task("A", "u1")).await.unwrap();
        let client = RemoteCollectionClient::new(backend.clone());
        client.reset(Some(PrincipalId::new("u1")));

        let fetcher = client.clone();
        let listing = tokio::spawn(async move { fetcher.fetch(&PrincipalId::new("u1"), true).await });
        tokio::task::yield_now().await;

        client.reset(None);
        backend.gate.notify_one();
        assert_eq!(listing.await.unwrap().unwrap().len(), 1);

        assert_eq!(client.owner(), None);
        assert!(client.cached().is_empty());
    }

    #[tokio::test]
    async fn offline_remote_always_fails() {
        let remote = OfflineRemote;
        let result = RemoteCollection::<Task>::list(&remote, &PrincipalId::new("u1")).await;
        assert!(matches!(result, Err(RemoteError::Unavailable(_))));
    }
}
