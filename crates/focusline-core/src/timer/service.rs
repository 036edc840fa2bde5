//! Persisted, ticking session timer.
//!
//! [`SessionTimer`] drives a [`SessionTimerEngine`] against a
//! [`PersistedValue<TimerState>`]: one Tokio ticker per timer, each tick a
//! local state write. Session log entries are staged synchronously and
//! pushed to the remote in detached tasks; the tick loop never awaits a
//! remote call.
//!
//! The state lives under `timer-state_<principal|anonymous>` and is
//! rebound when the principal changes. Whenever this context stops
//! driving a countdown (principal change, drop) the state it leaves
//! behind is persisted as paused, so sibling contexts never show a
//! running timer that nothing ticks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::engine::SessionTimerEngine;
use super::settings::{Durations, TimerSettings};
use super::state::{SessionType, TimerState};
use crate::error::{CoreError, Result};
use crate::events::Event;
use crate::principal::{PrincipalHandle, PrincipalId};
use crate::record::{LocalId, Record, RecordId, SessionLog, SessionLogPatch};
use crate::storage::{namespaced_key, PersistedValue, StoreHandle};
use crate::sync::OptimisticMutationEngine;

const EVENT_CAPACITY: usize = 64;

/// Construction options for [`SessionTimer`].
#[derive(Debug, Clone)]
pub struct TimerOptions {
    /// Scopes the persisted state key; followed for sign-in/sign-out.
    pub principal: PrincipalHandle,
    pub tick_interval: Duration,
    /// Start the next session as soon as one completes.
    pub auto_start_next: bool,
}

impl Default for TimerOptions {
    fn default() -> Self {
        Self {
            principal: PrincipalHandle::anonymous(),
            tick_interval: Duration::from_secs(1),
            auto_start_next: false,
        }
    }
}

struct StateBinding {
    principal: Option<PrincipalId>,
    state: Arc<PersistedValue<TimerState>>,
}

impl StateBinding {
    /// Load (or create) the state for `principal`. A state persisted as
    /// running is restored idle.
    fn bind(handle: &StoreHandle, engine: &SessionTimerEngine, principal: Option<PrincipalId>) -> Self {
        let key = namespaced_key("timer", principal.as_ref());
        let state = handle.persisted(key, engine.initial_state(Utc::now()));

        let loaded = state.get();
        let restored = engine.restore(loaded.clone());
        if restored != loaded {
            if let Err(e) = state.set(restored) {
                tracing::warn!(key = state.key(), error = %e, "failed to persist restored timer state");
            }
        }
        Self {
            principal,
            state: Arc::new(state),
        }
    }
}

struct TimerInner {
    handle: StoreHandle,
    principal: PrincipalHandle,
    engine: Mutex<SessionTimerEngine>,
    binding: Mutex<StateBinding>,
    log: Option<OptimisticMutationEngine<SessionLog>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    effects: Mutex<Vec<JoinHandle<()>>>,
    follower: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<Event>,
    tick_interval: Duration,
    auto_start_next: bool,
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        if let Some(follower) = self.follower.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            follower.abort();
        }
        let Some(ticker) = self.ticker.get_mut().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        if ticker.is_finished() {
            return;
        }
        ticker.abort();
        let engine = self.engine.get_mut().unwrap_or_else(PoisonError::into_inner);
        let binding = self.binding.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = binding.state.update(|state| engine.pause(state, Utc::now())) {
            tracing::warn!(key = binding.state.key(), error = %e, "failed to persist paused timer state");
        }
    }
}

/// Session timer for one execution context.
#[derive(Clone)]
pub struct SessionTimer {
    inner: Arc<TimerInner>,
}

impl std::fmt::Debug for SessionTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTimer")
            .field("key", &self.inner.bound().key())
            .field("ticking", &self.is_ticking())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionTimer {
    /// Load (or create) the timer state for the current principal. A state
    /// persisted as running is restored idle.
    ///
    /// Inside a Tokio runtime the timer also follows `options.principal`,
    /// emitting a [`Event::StateSnapshot`] for each newly bound state.
    pub fn new(
        handle: &StoreHandle,
        settings: &TimerSettings,
        log: Option<OptimisticMutationEngine<SessionLog>>,
        options: TimerOptions,
    ) -> Self {
        let engine = SessionTimerEngine::new(settings);
        let binding = StateBinding::bind(handle, &engine, options.principal.current());

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(TimerInner {
            handle: handle.clone(),
            principal: options.principal,
            engine: Mutex::new(engine),
            binding: Mutex::new(binding),
            log,
            ticker: Mutex::new(None),
            effects: Mutex::new(Vec::new()),
            follower: Mutex::new(None),
            events,
            tick_interval: options.tick_interval,
            auto_start_next: options.auto_start_next,
        });
        let follower = inner.spawn_principal_follower();
        *lock(&inner.follower) = follower;
        Self { inner }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin or resume the current session. Returns `None` if already
    /// running. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<Option<Event>> {
        self.inner.start()
    }

    pub fn pause(&self) -> Result<Option<Event>> {
        self.inner.command(|engine, state, now| engine.pause(state, now))
    }

    pub fn reset(&self) -> Result<Event> {
        self.inner
            .command(|engine, state, now| Some(engine.reset(state, now)))
            .map(|event| event.unwrap_or_else(|| self.snapshot()))
    }

    pub fn switch_session_type(&self, to: SessionType) -> Result<Event> {
        self.inner
            .command(|engine, state, now| Some(engine.switch_session_type(state, to, now)))
            .map(|event| event.unwrap_or_else(|| self.snapshot()))
    }

    /// Adopt new settings: immediately while idle, at the next transition
    /// while running.
    pub fn apply_settings(&self, settings: &TimerSettings) -> Result<Event> {
        self.inner.apply_settings(settings)
    }

    /// Apply every value published on `settings` until the sender or the
    /// timer goes away.
    pub fn follow_settings(&self, mut settings: watch::Receiver<TimerSettings>) -> Result<JoinHandle<()>> {
        let runtime = runtime()?;
        let timer = Arc::downgrade(&self.inner);
        Ok(runtime.spawn(async move {
            while settings.changed().await.is_ok() {
                let next = *settings.borrow_and_update();
                let Some(inner) = timer.upgrade() else { break };
                if let Err(e) = inner.apply_settings(&next) {
                    tracing::warn!(error = %e, "ignoring invalid timer settings");
                }
            }
        }))
    }

    /// Wait for detached session-log writes (create, completion) to finish.
    /// Call before dropping the runtime when the process is about to exit.
    pub async fn settle(&self) {
        loop {
            let pending = std::mem::take(&mut *lock(&self.inner.effects));
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "session log task failed");
                }
            }
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn state(&self) -> TimerState {
        self.inner.state().get()
    }

    pub fn snapshot(&self) -> Event {
        self.inner.snapshot()
    }

    pub fn durations(&self) -> Durations {
        *lock(&self.inner.engine).durations()
    }

    /// Timer events: starts, pauses, completions, settings changes.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Persisted state feed for the current principal, including values
    /// adopted from other contexts. The feed closes when the principal
    /// changes; [`subscribe`](Self::subscribe) carries a snapshot of the
    /// newly bound state.
    pub fn watch_state(&self) -> watch::Receiver<TimerState> {
        self.inner.state().subscribe()
    }

    /// True while this timer owns a live ticker.
    pub fn is_ticking(&self) -> bool {
        lock(&self.inner.ticker)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl TimerInner {
    fn start(self: &Arc<Self>) -> Result<Option<Event>> {
        let runtime = runtime()?;
        let state = self.state();
        let engine = lock(&self.engine);
        let mut ticker = lock(&self.ticker);

        let current = state.get();
        if current.is_running {
            return Ok(None);
        }
        let now = Utc::now();
        let staged = if current.active_session_log_id.is_none() {
            self.stage_log(&engine, &current, now)
        } else {
            None
        };

        let event = state.update(|state| {
            if let Some(record) = &staged {
                state.active_session_log_id = Some(record.id.clone());
            }
            engine.start(state, now)
        })?;
        drop(engine);

        if let Some(local_id) = staged.and_then(|record| record.id.as_local().cloned()) {
            self.spawn_log_push(&runtime, local_id);
        }

        if let Some(previous) = ticker.take() {
            previous.abort();
        }
        *ticker = Some(runtime.spawn(run_ticker(Arc::downgrade(self), self.tick_interval)));
        drop(ticker);

        if let Some(event) = &event {
            self.emit(event.clone());
        }
        Ok(event)
    }

    /// Run a state transition that ends ticking.
    fn command(
        &self,
        transition: impl FnOnce(&mut SessionTimerEngine, &mut TimerState, chrono::DateTime<Utc>) -> Option<Event>,
    ) -> Result<Option<Event>> {
        let state = self.state();
        let mut engine = lock(&self.engine);
        let event = state.update(|state| transition(&mut *engine, state, Utc::now()))?;
        drop(engine);
        self.stop_ticker();
        if let Some(event) = &event {
            self.emit(event.clone());
        }
        Ok(event)
    }

    fn apply_settings(&self, settings: &TimerSettings) -> Result<Event> {
        settings.validate()?;
        let state = self.state();
        let mut engine = lock(&self.engine);
        let event = state.update(|state| engine.apply_settings(settings, state, Utc::now()))?;
        drop(engine);
        self.emit(event.clone());
        Ok(event)
    }

    /// One second elapsed. Returns whether the ticker should keep going.
    fn tick(self: &Arc<Self>) -> bool {
        if self.rebind_if_principal_changed() {
            return false;
        }
        let state = self.bound();
        let mut engine = lock(&self.engine);
        let outcome = state.update(|state| (engine.tick(state, Utc::now()), state.is_running));
        drop(engine);

        match outcome {
            Ok((None, running)) => running,
            Ok((Some(completed), _)) => {
                self.on_completed(completed);
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist tick");
                true
            }
        }
    }

    fn on_completed(self: &Arc<Self>, event: Event) {
        // Detach, not abort: this runs on the ticker task itself.
        lock(&self.ticker).take();
        tracing::info!(kind = event.kind(), "session completed");
        self.emit(event.clone());

        if let (Event::SessionCompleted { session_log_id: Some(id), at, .. }, Some(log)) = (&event, &self.log) {
            match log.update(id, SessionLogPatch::completed_at(*at)) {
                Ok(Some(handle)) => self.track(handle),
                Ok(None) => {}
                Err(e) => tracing::warn!(%id, error = %e, "failed to mark session log completed"),
            }
        }

        if self.auto_start_next {
            if let Err(e) = self.start() {
                tracing::warn!(error = %e, "auto-start of next session failed");
            }
        }
    }

    fn stage_log(
        &self,
        engine: &SessionTimerEngine,
        state: &TimerState,
        now: chrono::DateTime<Utc>,
    ) -> Option<Record<SessionLog>> {
        let log = self.log.as_ref()?;
        log.principal()?;
        let entry = SessionLog::started(state.session_type, engine.duration_for(state.session_type), now);
        match log.stage_create(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(error = %e, "session log not recorded, timing locally");
                None
            }
        }
    }

    fn spawn_log_push(self: &Arc<Self>, runtime: &tokio::runtime::Handle, local_id: LocalId) {
        let Some(log) = self.log.clone() else { return };
        let timer = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            let Some(created) = log.push_create(&local_id).await else {
                return;
            };
            if let Some(inner) = timer.upgrade() {
                inner.promote_active_log(&local_id, created.id);
            }
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut effects = lock(&self.effects);
        effects.retain(|pending| !pending.is_finished());
        effects.push(handle);
    }

    /// Swap the active log id for its remote id, if it is still active.
    fn promote_active_log(&self, local_id: &LocalId, remote: RecordId) {
        let state = self.state();
        let _engine = lock(&self.engine);
        let stale = RecordId::Local(local_id.clone());
        let result = state.update(|state| {
            if state.active_session_log_id.as_ref() == Some(&stale) {
                state.active_session_log_id = Some(remote);
            }
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist promoted session log id");
        }
    }

    fn stop_ticker(&self) {
        if let Some(handle) = lock(&self.ticker).take() {
            handle.abort();
        }
    }

    fn snapshot(&self) -> Event {
        let state = self.state();
        let engine = lock(&self.engine);
        state.with(|state| engine.snapshot(state, Utc::now()))
    }

    /// State for the current principal, rebinding first if it changed.
    /// Must not be called with the engine lock held.
    fn state(&self) -> Arc<PersistedValue<TimerState>> {
        self.rebind_if_principal_changed();
        self.bound()
    }

    fn bound(&self) -> Arc<PersistedValue<TimerState>> {
        Arc::clone(&lock(&self.binding).state)
    }

    /// Switch to the current principal's state. The previous state is kept
    /// under its own key, paused if this context was ticking it.
    fn rebind_if_principal_changed(&self) -> bool {
        let current = self.principal.current();
        if lock(&self.binding).principal == current {
            return false;
        }
        let engine = lock(&self.engine);
        let mut binding = lock(&self.binding);
        if binding.principal == current {
            return false;
        }
        tracing::info!(principal = ?current, "principal changed, rebinding timer state");
        let next = StateBinding::bind(&self.handle, &engine, current);
        let previous = std::mem::replace(&mut *binding, next);
        drop(binding);

        let ticker = lock(&self.ticker).take();
        if let Some(ticker) = ticker.filter(|ticker| !ticker.is_finished()) {
            ticker.abort();
            if let Err(e) = previous.state.update(|state| engine.pause(state, Utc::now())) {
                tracing::warn!(key = previous.state.key(), error = %e, "failed to persist paused timer state");
            }
        }
        true
    }

    /// Rebind eagerly on sign-in/sign-out and announce the new state.
    fn spawn_principal_follower(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let timer = Arc::downgrade(self);
        let mut principal = self.principal.subscribe();
        Some(runtime.spawn(async move {
            while principal.changed().await.is_ok() {
                let Some(inner) = timer.upgrade() else { break };
                if inner.rebind_if_principal_changed() {
                    inner.emit(inner.snapshot());
                }
            }
        }))
    }

    fn emit(&self, event: Event) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

async fn run_ticker(timer: Weak<TimerInner>, period: Duration) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = timer.upgrade() else { break };
        if !inner.tick() {
            break;
        }
    }
}

fn runtime() -> Result<tokio::runtime::Handle> {
    tokio::runtime::Handle::try_current()
        .map_err(|e| CoreError::Custom(format!("timer requires a Tokio runtime: {e}")))
}
