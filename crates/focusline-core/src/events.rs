use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::RecordId;
use crate::timer::SessionType;

/// Every timer state change produces an Event.
/// The UI renders from them; the session log consumes completions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TimerStarted {
        session_type: SessionType,
        remaining_secs: u64,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    TimerPaused {
        session_type: SessionType,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerReset {
        session_type: SessionType,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    SessionTypeSwitched {
        from: SessionType,
        to: SessionType,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    /// A session ran to zero. `next` is the session type now loaded (idle).
    SessionCompleted {
        finished: SessionType,
        next: SessionType,
        completed_focus_sessions: u32,
        session_log_id: Option<RecordId>,
        at: DateTime<Utc>,
    },
    /// New settings were adopted. `deferred` settings wait for the next
    /// session transition.
    SettingsApplied {
        deferred: bool,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        session_type: SessionType,
        is_running: bool,
        remaining_secs: u64,
        total_secs: u64,
        progress_pct: f64,
        session_ordinal: u32,
        completed_focus_sessions: u32,
        active_session_log_id: Option<RecordId>,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Event name as serialized in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::TimerStarted { .. } => "timer_started",
            Event::TimerPaused { .. } => "timer_paused",
            Event::TimerReset { .. } => "timer_reset",
            Event::SessionTypeSwitched { .. } => "session_type_switched",
            Event::SessionCompleted { .. } => "session_completed",
            Event::SettingsApplied { .. } => "settings_applied",
            Event::StateSnapshot { .. } => "state_snapshot",
        }
    }
}
