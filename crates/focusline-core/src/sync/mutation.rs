//! Optimistic mutations over one synchronized collection.
//!
//! Every mutation lands in local state first and is visible immediately.
//! The matching remote call is then attempted; failures are logged and
//! swallowed, leaving the record local-only until the next explicit
//! [`sync_local_only`](OptimisticMutationEngine::sync_local_only). There is
//! no background retry.
//!
//! ## Collections
//!
//! - **local-only set**: `PersistedValue<Vec<Record<E>>>` under
//!   `"<kind>-state_<principal|anonymous>"`; holds only records with local ids.
//! - **remote shadow**: the [`RemoteCollectionClient`] cache; optimistic
//!   edits to remote records are applied here.
//!
//! The render-ready collection is [`merge_sorted`] of the two.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::reconciler::merge_sorted;
use super::remote::RemoteCollectionClient;
use crate::error::{CoreError, Result};
use crate::principal::{PrincipalHandle, PrincipalId};
use crate::record::{Entity, LocalId, Record, RecordId, RemoteId};
use crate::storage::{namespaced_key, PersistedValue, StoreHandle};

/// The merged collection plus the number of records awaiting sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(bound(serialize = "E: Entity"))]
pub struct CollectionView<E> {
    pub records: Vec<Record<E>>,
    pub pending_local: usize,
}

impl<E> Default for CollectionView<E> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            pending_local: 0,
        }
    }
}

/// Outcome of [`OptimisticMutationEngine::sync_local_only`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub promoted: usize,
    pub failed: usize,
}

type LocalSet<E> = PersistedValue<Vec<Record<E>>>;

struct Binding<E: Entity> {
    principal: Option<PrincipalId>,
    records: Arc<LocalSet<E>>,
}

impl<E: Entity> Binding<E> {
    fn bind(handle: &StoreHandle, principal: Option<PrincipalId>) -> Self {
        let key = namespaced_key(E::KIND, principal.as_ref());
        Self {
            records: Arc::new(handle.persisted(key, Vec::new())),
            principal,
        }
    }
}

struct EngineInner<E: Entity> {
    handle: StoreHandle,
    principal: PrincipalHandle,
    local: Mutex<Binding<E>>,
    remote: RemoteCollectionClient<E>,
    /// Local ids promoted during this process, so late edits addressed to
    /// the old id still reach the record.
    aliases: Mutex<HashMap<LocalId, RemoteId>>,
    in_flight: Mutex<HashSet<LocalId>>,
    view_tx: watch::Sender<CollectionView<E>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Entity> Drop for EngineInner<E> {
    fn drop(&mut self) {
        let forwarder = self
            .forwarder
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
    }
}

/// Optimistic create/update/delete for entity `E`.
pub struct OptimisticMutationEngine<E: Entity> {
    inner: Arc<EngineInner<E>>,
}

impl<E: Entity> Clone for OptimisticMutationEngine<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Entity> fmt::Debug for OptimisticMutationEngine<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticMutationEngine")
            .field("kind", &E::KIND)
            .field("context", &self.inner.handle.context())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E: Entity> OptimisticMutationEngine<E> {
    pub fn new(handle: &StoreHandle, principal: PrincipalHandle, remote: RemoteCollectionClient<E>) -> Self {
        let current = principal.current();
        remote.reset(current.clone());
        let binding = Binding::bind(handle, current);
        let engine = Self {
            inner: Arc::new(EngineInner {
                handle: handle.clone(),
                principal,
                local: Mutex::new(binding),
                remote,
                aliases: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                view_tx: watch::Sender::new(CollectionView::default()),
                forwarder: Mutex::new(None),
            }),
        };
        engine.publish_view();
        let forwarder = engine.spawn_view_forwarder();
        *lock(&engine.inner.forwarder) = forwarder;
        engine
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn principal(&self) -> Option<PrincipalId> {
        self.inner.principal.current()
    }

    /// Merged, newest-first collection and pending count.
    pub fn view(&self) -> CollectionView<E> {
        let local = self.local().get();
        let remote = self.inner.remote.cached_for(self.principal().as_ref());
        CollectionView {
            pending_local: local.len(),
            records: merge_sorted(&local, &remote),
        }
    }

    /// Render feed. Refreshed after every mutation and fetch, on writes to
    /// the local set from other contexts, and on principal changes.
    pub fn subscribe(&self) -> watch::Receiver<CollectionView<E>> {
        self.inner.view_tx.subscribe()
    }

    pub fn local_only(&self) -> Vec<Record<E>> {
        self.local().get()
    }

    pub fn pending_count(&self) -> usize {
        self.local().with(Vec::len)
    }

    /// Look a record up by id, following promotions.
    pub fn get(&self, id: &RecordId) -> Option<Record<E>> {
        let id = self.resolve(id);
        match &id {
            RecordId::Local(_) => self.local().with(|records| find(records, &id).cloned()),
            RecordId::Remote(remote_id) => self.inner.remote.cached_record(remote_id),
        }
    }

    // ── Create ───────────────────────────────────────────────────────

    /// Validate and append a local-only record. Nothing remote happens.
    pub fn stage_create(&self, fields: E) -> Result<Record<E>> {
        fields.validate()?;
        let record = Record::new_local(fields, self.principal(), Utc::now());
        self.local().update(|records| records.push(record.clone()))?;
        tracing::debug!(kind = E::KIND, id = %record.id, "staged local record");
        self.publish_view();
        Ok(record)
    }

    /// Try to create a staged record remotely.
    ///
    /// On success the local copy is dropped in favour of the remote one,
    /// edits made while the call was in flight are forwarded, and a record
    /// deleted in the meantime is deleted remotely too. Returns the remote
    /// record, or `None` when the record stays local-only.
    pub async fn push_create(&self, id: &LocalId) -> Option<Record<E>> {
        let owner = self.principal()?;
        let local = self.local();
        let target = RecordId::Local(id.clone());
        let sent = local.with(|records| find(records, &target).cloned())?;

        if !lock(&self.inner.in_flight).insert(id.clone()) {
            tracing::debug!(kind = E::KIND, %id, "create already in flight");
            return None;
        }
        let mut payload = sent.to_new();
        payload.owner_id.get_or_insert(owner);
        let result = self.inner.remote.create(payload).await;
        lock(&self.inner.in_flight).remove(id);

        match result {
            Ok(created) => self.promote(&local, id, &sent, created).await,
            Err(e) => {
                tracing::warn!(kind = E::KIND, %id, error = %e, "remote create failed, keeping local copy");
                None
            }
        }
    }

    /// Stage then push. Returns the remote record when the create went
    /// through, the local-only record otherwise.
    pub async fn create(&self, fields: E) -> Result<Record<E>> {
        let staged = self.stage_create(fields)?;
        let Some(id) = staged.id.as_local().cloned() else {
            return Ok(staged);
        };
        Ok(self.push_create(&id).await.unwrap_or(staged))
    }

    async fn promote(
        &self,
        local: &LocalSet<E>,
        local_id: &LocalId,
        sent: &Record<E>,
        created: Record<E>,
    ) -> Option<Record<E>> {
        let Some(remote_id) = created.id.as_remote().cloned() else {
            tracing::warn!(kind = E::KIND, id = %created.id, "remote create returned a non-remote id");
            return None;
        };

        let target = RecordId::Local(local_id.clone());
        let current = match local.update(|records| {
            let index = records.iter().position(|r| r.id == target)?;
            Some(records.remove(index))
        }) {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(kind = E::KIND, id = %local_id, error = %e, "failed to drop promoted local copy");
                local.with(|records| find(records, &target).cloned())
            }
        };
        lock(&self.inner.aliases).insert(local_id.clone(), remote_id.clone());

        let same_owner = created.owner_id.is_some() && created.owner_id == self.principal();
        if same_owner {
            self.inner.remote.upsert_cached(created.clone());
        }
        tracing::info!(kind = E::KIND, local = %local_id, remote = %remote_id, "promoted local record");

        match current {
            None => {
                tracing::debug!(kind = E::KIND, %remote_id, "record deleted during create, removing remotely");
                self.inner.remote.remove_cached(&remote_id);
                if let Err(e) = self.inner.remote.delete(&remote_id).await {
                    tracing::warn!(kind = E::KIND, %remote_id, error = %e, "remote delete failed");
                }
            }
            Some(current) if current.fields != sent.fields => {
                let patch = current.fields.to_patch();
                if same_owner {
                    self.inner.remote.patch_cached(&remote_id, &patch);
                }
                match self.inner.remote.update(&remote_id, &patch).await {
                    Ok(updated) if same_owner => self.inner.remote.upsert_cached(updated),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(kind = E::KIND, %remote_id, error = %e, "forwarding in-flight edit failed");
                    }
                }
            }
            Some(_) => {}
        }

        self.publish_view();
        Some(created)
    }

    // ── Update / delete ──────────────────────────────────────────────

    /// Apply `patch` locally right away. For a remote record the remote
    /// update is fired in the background; its handle is returned so
    /// callers may await it, but nothing requires them to.
    ///
    /// # Errors
    /// `Validation` if the patched record is invalid, `RecordNotFound` for
    /// an unknown local id, `Storage` if the local write fails.
    pub fn update(&self, id: &RecordId, patch: E::Patch) -> Result<Option<JoinHandle<()>>> {
        let id = self.resolve(id);
        match &id {
            RecordId::Local(local_id) => {
                let local = self.local();
                let mut record = local
                    .with(|records| find(records, &id).cloned())
                    .ok_or_else(|| CoreError::RecordNotFound(id.to_string()))?;
                record.apply(&patch, Utc::now());
                record.fields.validate()?;
                local.update(|records| {
                    if let Some(slot) = records.iter_mut().find(|r| r.id == id) {
                        *slot = record;
                    }
                })?;
                tracing::debug!(kind = E::KIND, id = %local_id, "updated local record");
                self.publish_view();
                Ok(None)
            }
            RecordId::Remote(remote_id) => {
                if let Some(mut shadow) = self.inner.remote.cached_record(remote_id) {
                    shadow.apply(&patch, Utc::now());
                    shadow.fields.validate()?;
                    self.inner.remote.upsert_cached(shadow);
                    self.publish_view();
                }
                if self.principal().is_none() {
                    return Ok(None);
                }
                let engine = self.clone();
                let remote_id = remote_id.clone();
                Ok(self.spawn_remote("update", async move {
                    match engine.inner.remote.update(&remote_id, &patch).await {
                        Ok(updated) => {
                            if engine.inner.remote.cached_record(&remote_id).is_some() {
                                engine.inner.remote.upsert_cached(updated);
                                engine.publish_view();
                            }
                        }
                        Err(e) => {
                            tracing::warn!(kind = E::KIND, %remote_id, error = %e, "remote update failed, local edit stands");
                        }
                    }
                }))
            }
        }
    }

    /// Remove a record locally right away. Remote records are deleted in
    /// the background; a failed remote delete does not restore the record.
    pub fn delete(&self, id: &RecordId) -> Result<Option<JoinHandle<()>>> {
        let id = self.resolve(id);
        match &id {
            RecordId::Local(local_id) => {
                let removed = self.local().update(|records| {
                    let before = records.len();
                    records.retain(|r| r.id != id);
                    before != records.len()
                })?;
                if !removed {
                    return Err(CoreError::RecordNotFound(id.to_string()));
                }
                tracing::debug!(kind = E::KIND, id = %local_id, "deleted local record");
                self.publish_view();
                Ok(None)
            }
            RecordId::Remote(remote_id) => {
                self.inner.remote.remove_cached(remote_id);
                self.publish_view();
                if self.principal().is_none() {
                    return Ok(None);
                }
                let engine = self.clone();
                let remote_id = remote_id.clone();
                Ok(self.spawn_remote("delete", async move {
                    if let Err(e) = engine.inner.remote.delete(&remote_id).await {
                        tracing::warn!(kind = E::KIND, %remote_id, error = %e, "remote delete failed");
                    }
                }))
            }
        }
    }

    // ── Sync ─────────────────────────────────────────────────────────

    /// Attempt a remote create for every local-only record. Successes are
    /// pruned; failures stay for the next call.
    pub async fn sync_local_only(&self) -> SyncReport {
        let mut report = SyncReport::default();
        if self.principal().is_none() {
            return report;
        }
        let pending: Vec<LocalId> = self
            .local_only()
            .into_iter()
            .filter_map(|record| record.id.as_local().cloned())
            .collect();

        for id in pending {
            report.attempted += 1;
            if self.push_create(&id).await.is_some() {
                report.promoted += 1;
            } else {
                report.failed += 1;
            }
        }
        tracing::info!(
            kind = E::KIND,
            attempted = report.attempted,
            promoted = report.promoted,
            failed = report.failed,
            "local-only sync finished"
        );
        report
    }

    /// Re-list the remote collection for the current principal. Returns
    /// `false` in local mode or when the remote is unreachable.
    pub async fn refresh(&self, force: bool) -> bool {
        self.rebind_if_principal_changed();
        let Some(owner) = self.principal() else {
            self.publish_view();
            return false;
        };
        let fetched = match self.inner.remote.fetch(&owner, force).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(kind = E::KIND, %owner, error = %e, "remote fetch failed, showing cached records");
                false
            }
        };
        self.publish_view();
        fetched
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Local set for the current principal, rebinding when it changed.
    fn local(&self) -> Arc<LocalSet<E>> {
        self.rebind_if_principal_changed();
        Arc::clone(&lock(&self.inner.local).records)
    }

    /// Point the local set and the remote cache at the current principal's
    /// namespace.
    fn rebind_if_principal_changed(&self) {
        let current = self.inner.principal.current();
        let mut binding = lock(&self.inner.local);
        if binding.principal == current {
            return;
        }
        tracing::debug!(kind = E::KIND, principal = ?current, "principal changed, rebinding collection");
        self.inner.remote.reset(current.clone());
        lock(&self.inner.aliases).clear();
        *binding = Binding::bind(&self.inner.handle, current);
    }

    /// Keep the render feed current with writes this engine does not make
    /// itself: other contexts touching the local set, and sign-in/sign-out.
    fn spawn_view_forwarder(&self) -> Option<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let weak = Arc::downgrade(&self.inner);
        let mut principal_rx = self.inner.principal.subscribe();
        let mut local_rx = self.local().subscribe();
        Some(runtime.spawn(async move {
            loop {
                tokio::select! {
                    changed = principal_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    // Errs once the set is unbound; resubscribed below.
                    _ = local_rx.changed() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                let engine = Self { inner };
                local_rx = engine.local().subscribe();
                engine.publish_view();
            }
        }))
    }

    fn resolve(&self, id: &RecordId) -> RecordId {
        if let RecordId::Local(local_id) = id {
            if let Some(remote_id) = lock(&self.inner.aliases).get(local_id) {
                return RecordId::Remote(remote_id.clone());
            }
        }
        id.clone()
    }

    fn publish_view(&self) {
        let next = self.view();
        self.inner.view_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn spawn_remote<F>(&self, operation: &'static str, task: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(task)),
            Err(_) => {
                tracing::warn!(kind = E::KIND, operation, "no async runtime, remote call skipped");
                None
            }
        }
    }
}

fn find<'a, E>(records: &'a [Record<E>], id: &RecordId) -> Option<&'a Record<E>> {
    records.iter().find(|r| &r.id == id)
}
