use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::record::RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Focus,
    ShortBreak,
    LongBreak,
}

impl SessionType {
    pub fn is_break(&self) -> bool {
        !matches!(self, SessionType::Focus)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Focus => "focus",
            SessionType::ShortBreak => "short_break",
            SessionType::LongBreak => "long_break",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").to_ascii_lowercase().as_str() {
            "focus" => Ok(SessionType::Focus),
            "short_break" | "short" => Ok(SessionType::ShortBreak),
            "long_break" | "long" => Ok(SessionType::LongBreak),
            other => Err(ValidationError::InvalidPatch(format!(
                "unknown session type '{other}'"
            ))),
        }
    }
}

/// Persisted timer state for one principal (or the anonymous context).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerState {
    pub remaining_secs: u64,
    /// Only true while this context holds a live ticker. Always restored
    /// as `false`.
    pub is_running: bool,
    pub session_type: SessionType,
    /// Focus sessions started since the cycle began.
    #[serde(default)]
    pub session_ordinal: u32,
    /// Lifetime count of fully completed focus sessions. Never decreases.
    #[serde(default)]
    pub completed_focus_sessions: u32,
    /// Session log entry of the session in progress, if one was recorded.
    #[serde(default)]
    pub active_session_log_id: Option<RecordId>,
    /// Diagnostics only.
    pub last_updated: DateTime<Utc>,
}

impl TimerState {
    /// A fresh, idle focus session of `focus_secs`.
    pub fn new(focus_secs: u64, now: DateTime<Utc>) -> Self {
        Self {
            remaining_secs: focus_secs,
            is_running: false,
            session_type: SessionType::Focus,
            session_ordinal: 0,
            completed_focus_sessions: 0,
            active_session_log_id: None,
            last_updated: now,
        }
    }

    /// State as seen after a full reload: everything kept except
    /// `is_running`, which is never resumed silently.
    pub fn restored(mut self) -> Self {
        self.is_running = false;
        self
    }
}
