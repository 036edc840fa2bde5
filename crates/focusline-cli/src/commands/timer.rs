//! Timer commands.
//!
//! A session only ticks while a foreground `start` or `run` holds it; any
//! other invocation sees the persisted state restored idle.

use std::error::Error;
use std::time::Duration;

use clap::Subcommand;
use focusline_core::{Event, SessionTimer, SessionType, TimerSettings};
use tokio::sync::broadcast::error::RecvError;

use super::{print_json, print_line};
use crate::app::App;

#[derive(Subcommand)]
pub enum TimerAction {
    /// Show current timer state
    Status,
    /// Start the current session and tick it in the foreground (Ctrl-C pauses)
    Start {
        /// Tick period in milliseconds
        #[arg(long, default_value = "1000", hide = true)]
        tick_ms: u64,
    },
    /// Run consecutive sessions in the foreground (Ctrl-C pauses)
    Run {
        /// Stop after this many sessions. Default: 1, or unbounded when
        /// `auto_start_next` is set
        #[arg(long)]
        sessions: Option<u32>,
        /// Tick period in milliseconds
        #[arg(long, default_value = "1000", hide = true)]
        tick_ms: u64,
    },
    /// Pause the timer
    Pause,
    /// Reset the current session to its full duration
    Reset,
    /// Switch to another session type (focus, short_break, long_break)
    Switch {
        session_type: SessionType,
    },
    /// Show or change timer settings
    Settings {
        /// Focus session length in minutes
        #[arg(long)]
        focus: Option<u32>,
        /// Short break length in minutes
        #[arg(long)]
        short_break: Option<u32>,
        /// Long break length in minutes
        #[arg(long)]
        long_break: Option<u32>,
        /// Focus sessions before a long break
        #[arg(long)]
        long_break_every: Option<u32>,
    },
}

pub async fn run(action: TimerAction, app: &App) -> Result<(), Box<dyn Error>> {
    match action {
        TimerAction::Status => {
            let timer = app.timer(Duration::from_secs(1))?;
            print_json(&timer.snapshot())?;
        }
        TimerAction::Start { tick_ms } => {
            let timer = app.timer(Duration::from_millis(tick_ms.max(1)))?;
            foreground(&timer, Some(1)).await?;
        }
        TimerAction::Run { sessions, tick_ms } => {
            let limit = match sessions {
                Some(n) => Some(n.max(1)),
                None if app.config.auto_start_next => None,
                None => Some(1),
            };
            let timer = app.timer(Duration::from_millis(tick_ms.max(1)))?;
            foreground(&timer, limit).await?;
        }
        TimerAction::Pause => {
            let timer = app.timer(Duration::from_secs(1))?;
            let event = timer.pause()?.unwrap_or_else(|| timer.snapshot());
            print_json(&event)?;
        }
        TimerAction::Reset => {
            let timer = app.timer(Duration::from_secs(1))?;
            print_json(&timer.reset()?)?;
        }
        TimerAction::Switch { session_type } => {
            let timer = app.timer(Duration::from_secs(1))?;
            print_json(&timer.switch_session_type(session_type)?)?;
        }
        TimerAction::Settings {
            focus,
            short_break,
            long_break,
            long_break_every,
        } => {
            let store = app.settings();
            let current = store.get();
            let next = TimerSettings {
                focus_minutes: focus.unwrap_or(current.focus_minutes),
                short_break_minutes: short_break.unwrap_or(current.short_break_minutes),
                long_break_minutes: long_break.unwrap_or(current.long_break_minutes),
                sessions_until_long_break: long_break_every
                    .unwrap_or(current.sessions_until_long_break),
            };
            if next != current {
                store.set(next)?;
                // Idle timers adopt the new durations right away.
                let timer = app.timer(Duration::from_secs(1))?;
                timer.apply_settings(&next)?;
            }
            print_json(&store.get())?;
        }
    }
    Ok(())
}

/// Tick until `limit` sessions have completed (`None`: until interrupted),
/// printing every event as one JSON line.
async fn foreground(timer: &SessionTimer, limit: Option<u32>) -> Result<(), Box<dyn Error>> {
    let mut events = timer.subscribe();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    if timer.start()?.is_none() {
        print_line(&timer.snapshot())?;
        return Ok(());
    }

    let mut completed = 0u32;
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    print_line(&event)?;
                    if matches!(event, Event::SessionCompleted { .. }) {
                        completed += 1;
                        if limit.is_some_and(|limit| completed >= limit) {
                            break;
                        }
                        timer.start()?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "timer events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut interrupt => {
                if let Some(event) = timer.pause()? {
                    print_line(&event)?;
                }
                break;
            }
        }
    }

    timer.settle().await;
    Ok(())
}
