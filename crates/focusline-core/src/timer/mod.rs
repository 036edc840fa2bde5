mod engine;
mod service;
mod settings;
mod state;

pub use engine::SessionTimerEngine;
pub use service::{SessionTimer, TimerOptions};
pub use settings::{Durations, SettingsError, SettingsStore, TimerSettings};
pub use state::{SessionType, TimerState};
