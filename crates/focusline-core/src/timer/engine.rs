//! Session timer state machine.
//!
//! The engine is pure: it owns only the durations in effect and applies
//! transitions to a [`TimerState`] the caller holds (and persists). It has
//! no threads or clock of its own; the caller invokes `tick()` once per
//! elapsed second and passes `now` for diagnostics.
//!
//! ## State Transitions
//!
//! ```text
//!            start            remaining hits 0
//! idle ───────────> running ─────────────────> idle (next session type)
//!  ^                  │ pause
//!  └──────────────────┘
//!
//! focus ──complete──> short_break | long_break   (long every N focus sessions)
//! short_break | long_break ──complete──> focus
//! ```
//!
//! `reset` and `switch_session_type` are valid from anywhere and always
//! land idle with a full session loaded.

use chrono::{DateTime, Utc};

use super::settings::{Durations, TimerSettings};
use super::state::{SessionType, TimerState};
use crate::events::Event;

/// Core timer state machine.
#[derive(Debug, Clone)]
pub struct SessionTimerEngine {
    /// Durations governing the current session.
    active: Durations,
    /// Settings that arrived mid-session; adopted at the next transition.
    deferred: Option<Durations>,
}

impl SessionTimerEngine {
    pub fn new(settings: &TimerSettings) -> Self {
        Self {
            active: settings.durations(),
            deferred: None,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn durations(&self) -> &Durations {
        &self.active
    }

    pub fn deferred(&self) -> Option<&Durations> {
        self.deferred.as_ref()
    }

    pub fn duration_for(&self, session_type: SessionType) -> u64 {
        self.active.for_type(session_type)
    }

    /// Idle focus session at full length.
    pub fn initial_state(&self, now: DateTime<Utc>) -> TimerState {
        TimerState::new(self.active.focus_secs, now)
    }

    /// Adopt a state read back from storage: never running, and clamped
    /// into the current durations.
    pub fn restore(&self, state: TimerState) -> TimerState {
        let mut state = state.restored();
        let full = self.duration_for(state.session_type);
        if state.remaining_secs == 0 || state.remaining_secs > full {
            state.remaining_secs = full;
        }
        state
    }

    /// 0.0 .. 100.0 progress within the current session.
    pub fn progress_pct(&self, state: &TimerState) -> f64 {
        let total = self.duration_for(state.session_type);
        if total == 0 {
            return 0.0;
        }
        let elapsed = total.saturating_sub(state.remaining_secs);
        (elapsed as f64 / total as f64 * 100.0).min(100.0)
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self, state: &TimerState, now: DateTime<Utc>) -> Event {
        Event::StateSnapshot {
            session_type: state.session_type,
            is_running: state.is_running,
            remaining_secs: state.remaining_secs,
            total_secs: self.duration_for(state.session_type),
            progress_pct: self.progress_pct(state),
            session_ordinal: state.session_ordinal,
            completed_focus_sessions: state.completed_focus_sessions,
            active_session_log_id: state.active_session_log_id.clone(),
            at: now,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Begin or resume counting down. No-op while already running.
    pub fn start(&self, state: &mut TimerState, now: DateTime<Utc>) -> Option<Event> {
        if state.is_running {
            return None;
        }
        let full = self.duration_for(state.session_type);
        if state.remaining_secs == 0 || state.remaining_secs > full {
            state.remaining_secs = full;
        }
        state.is_running = true;
        state.last_updated = now;
        tracing::debug!(session_type = %state.session_type, remaining = state.remaining_secs, "timer started");
        Some(Event::TimerStarted {
            session_type: state.session_type,
            remaining_secs: state.remaining_secs,
            duration_secs: full,
            at: now,
        })
    }

    /// Stop counting down, keeping the remaining time. Only valid while
    /// running.
    pub fn pause(&self, state: &mut TimerState, now: DateTime<Utc>) -> Option<Event> {
        if !state.is_running {
            return None;
        }
        state.is_running = false;
        state.last_updated = now;
        tracing::debug!(remaining = state.remaining_secs, "timer paused");
        Some(Event::TimerPaused {
            session_type: state.session_type,
            remaining_secs: state.remaining_secs,
            at: now,
        })
    }

    /// Advance one second. Returns `Some(Event::SessionCompleted)` on the
    /// tick that reaches zero; ticks while idle do nothing.
    pub fn tick(&mut self, state: &mut TimerState, now: DateTime<Utc>) -> Option<Event> {
        if !state.is_running {
            return None;
        }
        state.remaining_secs = state.remaining_secs.saturating_sub(1);
        state.last_updated = now;
        if state.remaining_secs == 0 {
            Some(self.complete(state, now))
        } else {
            None
        }
    }

    /// Load a full session of the current type and go idle. The active
    /// session log entry is forgotten, not marked.
    pub fn reset(&mut self, state: &mut TimerState, now: DateTime<Utc>) -> Event {
        self.adopt_deferred();
        state.is_running = false;
        state.remaining_secs = self.duration_for(state.session_type);
        state.active_session_log_id = None;
        state.last_updated = now;
        tracing::debug!(session_type = %state.session_type, "timer reset");
        Event::TimerReset {
            session_type: state.session_type,
            remaining_secs: state.remaining_secs,
            at: now,
        }
    }

    /// Manual override of the session type.
    pub fn switch_session_type(
        &mut self,
        state: &mut TimerState,
        to: SessionType,
        now: DateTime<Utc>,
    ) -> Event {
        self.adopt_deferred();
        let from = state.session_type;
        state.session_type = to;
        state.is_running = false;
        state.remaining_secs = self.duration_for(to);
        state.active_session_log_id = None;
        state.last_updated = now;
        tracing::debug!(%from, %to, "session type switched");
        Event::SessionTypeSwitched {
            from,
            to,
            remaining_secs: state.remaining_secs,
            at: now,
        }
    }

    /// New settings. Applied immediately while idle (the current session
    /// is reloaded at the new length); deferred while running.
    pub fn apply_settings(
        &mut self,
        settings: &TimerSettings,
        state: &mut TimerState,
        now: DateTime<Utc>,
    ) -> Event {
        let durations = settings.durations();
        if state.is_running {
            self.deferred = Some(durations);
            tracing::debug!("settings deferred until next transition");
            return Event::SettingsApplied {
                deferred: true,
                remaining_secs: state.remaining_secs,
                at: now,
            };
        }
        self.active = durations;
        self.deferred = None;
        state.remaining_secs = self.duration_for(state.session_type);
        state.last_updated = now;
        Event::SettingsApplied {
            deferred: false,
            remaining_secs: state.remaining_secs,
            at: now,
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn complete(&mut self, state: &mut TimerState, now: DateTime<Utc>) -> Event {
        self.adopt_deferred();
        let finished = state.session_type;
        let next = match finished {
            SessionType::Focus => {
                let cadence = self.active.sessions_until_long_break.max(1);
                let next = if (state.completed_focus_sessions + 1) % cadence == 0 {
                    SessionType::LongBreak
                } else {
                    SessionType::ShortBreak
                };
                state.completed_focus_sessions += 1;
                next
            }
            SessionType::ShortBreak | SessionType::LongBreak => {
                state.session_ordinal += 1;
                SessionType::Focus
            }
        };
        state.session_type = next;
        state.remaining_secs = self.duration_for(next);
        state.is_running = false;
        state.last_updated = now;
        let session_log_id = state.active_session_log_id.take();
        tracing::debug!(%finished, %next, completed = state.completed_focus_sessions, "session completed");
        Event::SessionCompleted {
            finished,
            next,
            completed_focus_sessions: state.completed_focus_sessions,
            session_log_id,
            at: now,
        }
    }

    fn adopt_deferred(&mut self) {
        if let Some(durations) = self.deferred.take() {
            self.active = durations;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{LocalId, RecordId};

    fn engine() -> (SessionTimerEngine, TimerState) {
        let engine = SessionTimerEngine::new(&TimerSettings::default());
        let state = engine.initial_state(Utc::now());
        (engine, state)
    }

    fn run_to_completion(engine: &mut SessionTimerEngine, state: &mut TimerState) -> Event {
        engine.start(state, Utc::now());
        loop {
            if let Some(event) = engine.tick(state, Utc::now()) {
                return event;
            }
        }
    }

    #[test]
    fn start_pause_start() {
        let (engine, mut state) = engine();
        assert!(engine.start(&mut state, Utc::now()).is_some());
        assert!(state.is_running);
        assert!(engine.start(&mut state, Utc::now()).is_none());

        assert!(engine.pause(&mut state, Utc::now()).is_some());
        assert!(!state.is_running);
        assert!(engine.pause(&mut state, Utc::now()).is_none());
    }

    #[test]
    fn tick_while_idle_is_noop() {
        let (mut engine, mut state) = engine();
        assert!(engine.tick(&mut state, Utc::now()).is_none());
        assert_eq!(state.remaining_secs, 1500);
    }

    #[test]
    fn pause_retains_remaining() {
        let (mut engine, mut state) = engine();
        engine.start(&mut state, Utc::now());
        for _ in 0..100 {
            engine.tick(&mut state, Utc::now());
        }
        engine.pause(&mut state, Utc::now());
        assert_eq!(state.remaining_secs, 1400);
        engine.start(&mut state, Utc::now());
        assert_eq!(state.remaining_secs, 1400);
    }

    #[test]
    fn focus_completion_goes_to_short_break() {
        let (mut engine, mut state) = engine();
        state.active_session_log_id = Some(RecordId::Local(LocalId::generate()));
        let event = run_to_completion(&mut engine, &mut state);
        match event {
            Event::SessionCompleted {
                finished,
                next,
                completed_focus_sessions,
                session_log_id,
                ..
            } => {
                assert_eq!(finished, SessionType::Focus);
                assert_eq!(next, SessionType::ShortBreak);
                assert_eq!(completed_focus_sessions, 1);
                assert!(session_log_id.is_some());
            }
            other => panic!("Expected SessionCompleted, got {other:?}"),
        }
        assert!(!state.is_running);
        assert_eq!(state.remaining_secs, 300);
        assert!(state.active_session_log_id.is_none());
    }

    #[test]
    fn break_completion_returns_to_focus() {
        let (mut engine, mut state) = engine();
        engine.switch_session_type(&mut state, SessionType::ShortBreak, Utc::now());
        run_to_completion(&mut engine, &mut state);
        assert_eq!(state.session_type, SessionType::Focus);
        assert_eq!(state.session_ordinal, 1);
        assert_eq!(state.completed_focus_sessions, 0);
        assert_eq!(state.remaining_secs, 1500);
    }

    #[test]
    fn no_tick_past_zero() {
        let (mut engine, mut state) = engine();
        state.remaining_secs = 1;
        engine.start(&mut state, Utc::now());
        assert!(engine.tick(&mut state, Utc::now()).is_some());
        // Completed and idle: further ticks neither count nor complete.
        assert!(engine.tick(&mut state, Utc::now()).is_none());
        assert_eq!(state.remaining_secs, 300);
        assert_eq!(state.completed_focus_sessions, 1);
    }

    #[test]
    fn reset_reloads_current_type_and_forgets_log() {
        let (mut engine, mut state) = engine();
        engine.switch_session_type(&mut state, SessionType::LongBreak, Utc::now());
        engine.start(&mut state, Utc::now());
        state.active_session_log_id = Some(RecordId::Local(LocalId::generate()));
        engine.tick(&mut state, Utc::now());
        engine.reset(&mut state, Utc::now());
        assert_eq!(state.session_type, SessionType::LongBreak);
        assert_eq!(state.remaining_secs, 900);
        assert!(!state.is_running);
        assert!(state.active_session_log_id.is_none());
    }

    #[test]
    fn settings_apply_immediately_when_idle() {
        let (mut engine, mut state) = engine();
        let settings = TimerSettings {
            focus_minutes: 30,
            ..Default::default()
        };
        let event = engine.apply_settings(&settings, &mut state, Utc::now());
        assert!(matches!(event, Event::SettingsApplied { deferred: false, .. }));
        assert_eq!(state.remaining_secs, 1800);
    }

    #[test]
    fn settings_defer_while_running() {
        let (mut engine, mut state) = engine();
        engine.start(&mut state, Utc::now());
        engine.tick(&mut state, Utc::now());
        let settings = TimerSettings {
            focus_minutes: 30,
            short_break_minutes: 10,
            ..Default::default()
        };
        let event = engine.apply_settings(&settings, &mut state, Utc::now());
        assert!(matches!(event, Event::SettingsApplied { deferred: true, .. }));
        assert_eq!(state.remaining_secs, 1499);
        assert_eq!(engine.duration_for(SessionType::Focus), 1500);

        loop {
            if engine.tick(&mut state, Utc::now()).is_some() {
                break;
            }
        }
        assert_eq!(state.session_type, SessionType::ShortBreak);
        assert_eq!(state.remaining_secs, 600);
        assert!(engine.deferred().is_none());
    }

    #[test]
    fn restore_clamps_into_durations() {
        let (engine, mut state) = engine();
        state.is_running = true;
        state.remaining_secs = 99_999;
        let restored = engine.restore(state);
        assert!(!restored.is_running);
        assert_eq!(restored.remaining_secs, 1500);
    }

    #[test]
    fn snapshot_returns_valid_event() {
        let (engine, state) = engine();
        match engine.snapshot(&state, Utc::now()) {
            Event::StateSnapshot {
                is_running,
                remaining_secs,
                total_secs,
                progress_pct,
                ..
            } => {
                assert!(!is_running);
                assert_eq!(remaining_secs, 1500);
                assert_eq!(total_secs, 1500);
                assert_eq!(progress_pct, 0.0);
            }
            other => panic!("Expected StateSnapshot, got {other:?}"),
        }
    }
}
