//! Timer behavior end to end: the pure engine for the arithmetic, the
//! ticking driver over a SQLite store for persistence.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use focusline_core::{
    ChangeBus, Event, SessionTimer, SessionTimerEngine, SessionType, SqliteStore, StoreHandle,
    TimerOptions, TimerSettings, TimerState,
};
use proptest::prelude::*;
use tempfile::TempDir;

fn run_to_completion(engine: &mut SessionTimerEngine, state: &mut TimerState) -> Event {
    engine.start(state, Utc::now());
    loop {
        if let Some(event) = engine.tick(state, Utc::now()) {
            return event;
        }
    }
}

#[test]
fn test_focus_runs_down_to_short_break() {
    let mut engine = SessionTimerEngine::new(&TimerSettings::default());
    let mut state = engine.initial_state(Utc::now());
    assert_eq!(state.remaining_secs, 1500);

    engine.start(&mut state, Utc::now());
    let mut completion = None;
    for _ in 0..1500 {
        completion = engine.tick(&mut state, Utc::now());
    }

    match completion {
        Some(Event::SessionCompleted {
            finished,
            next,
            completed_focus_sessions,
            ..
        }) => {
            assert_eq!(finished, SessionType::Focus);
            assert_eq!(next, SessionType::ShortBreak);
            assert_eq!(completed_focus_sessions, 1);
        }
        other => panic!("Expected SessionCompleted on tick 1500, got {other:?}"),
    }
    assert_eq!(state.session_type, SessionType::ShortBreak);
    assert_eq!(state.remaining_secs, 300);
    assert!(!state.is_running);
}

#[test]
fn test_long_break_every_n_focus_sessions() {
    let settings = TimerSettings {
        sessions_until_long_break: 4,
        ..Default::default()
    };
    let mut engine = SessionTimerEngine::new(&settings);
    let mut state = engine.initial_state(Utc::now());

    let mut breaks = Vec::new();
    for _ in 0..8 {
        run_to_completion(&mut engine, &mut state);
        breaks.push(state.session_type);
        run_to_completion(&mut engine, &mut state);
        assert_eq!(state.session_type, SessionType::Focus);
    }

    use SessionType::{LongBreak as L, ShortBreak as S};
    assert_eq!(breaks, [S, S, S, L, S, S, S, L]);
    assert_eq!(state.completed_focus_sessions, 8);
    assert_eq!(state.session_ordinal, 8);
}

#[test]
fn test_settings_change_while_idle_applies_now() {
    let mut engine = SessionTimerEngine::new(&TimerSettings::default());
    let mut state = engine.initial_state(Utc::now());

    let thirty = TimerSettings {
        focus_minutes: 30,
        ..Default::default()
    };
    let event = engine.apply_settings(&thirty, &mut state, Utc::now());

    assert!(matches!(event, Event::SettingsApplied { deferred: false, .. }));
    assert_eq!(state.remaining_secs, 1800);
}

#[test]
fn test_settings_change_while_running_waits_for_transition() {
    let mut engine = SessionTimerEngine::new(&TimerSettings::default());
    let mut state = engine.initial_state(Utc::now());
    engine.start(&mut state, Utc::now());
    for _ in 0..100 {
        engine.tick(&mut state, Utc::now());
    }

    let changed = TimerSettings {
        focus_minutes: 30,
        short_break_minutes: 10,
        ..Default::default()
    };
    let event = engine.apply_settings(&changed, &mut state, Utc::now());
    assert!(matches!(event, Event::SettingsApplied { deferred: true, .. }));
    assert_eq!(state.remaining_secs, 1400);
    assert_eq!(engine.durations().focus_secs, 1500);

    for _ in 0..1400 {
        engine.tick(&mut state, Utc::now());
    }
    assert_eq!(state.session_type, SessionType::ShortBreak);
    assert_eq!(state.remaining_secs, 600);
    assert_eq!(engine.durations().focus_secs, 1800);
    assert!(engine.deferred().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_timer_state_survives_restart_idle() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("focusline.db");
    let settings = TimerSettings::default();

    {
        let store = Arc::new(SqliteStore::open_at(&db).unwrap());
        let handle = StoreHandle::new(store, ChangeBus::new());
        let timer = SessionTimer::new(&handle, &settings, None, TimerOptions::default());
        timer.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(timer.state().remaining_secs, 1490);
        assert!(timer.state().is_running);
    }

    let store = Arc::new(SqliteStore::open_at(&db).unwrap());
    let handle = StoreHandle::new(store, ChangeBus::new());
    let timer = SessionTimer::new(&handle, &settings, None, TimerOptions::default());
    let state = timer.state();
    assert!(!state.is_running);
    assert_eq!(state.remaining_secs, 1490);
    assert!(!timer.is_ticking());

    // Nothing ticks until asked to.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(timer.state().remaining_secs, 1490);
}

#[derive(Debug, Clone)]
enum Command {
    Start,
    Pause,
    Tick(u16),
    Reset,
    Switch(SessionType),
    Settings(u32, u32, u32, u32),
}

fn command() -> impl Strategy<Value = Command> {
    let session_type = prop_oneof![
        Just(SessionType::Focus),
        Just(SessionType::ShortBreak),
        Just(SessionType::LongBreak),
    ];
    prop_oneof![
        Just(Command::Start),
        Just(Command::Pause),
        (1u16..2000).prop_map(Command::Tick),
        Just(Command::Reset),
        session_type.prop_map(Command::Switch),
        (1u32..=5, 1u32..=3, 1u32..=6, 1u32..=4).prop_map(|(f, s, l, n)| Command::Settings(f, s, l, n)),
    ]
}

proptest! {
    #[test]
    fn remaining_never_exceeds_session_length(commands in prop::collection::vec(command(), 1..60)) {
        let mut engine = SessionTimerEngine::new(&TimerSettings::default());
        let mut state = engine.initial_state(Utc::now());
        let mut completed = 0;

        for command in commands {
            let now = Utc::now();
            match command {
                Command::Start => { engine.start(&mut state, now); }
                Command::Pause => { engine.pause(&mut state, now); }
                Command::Tick(n) => {
                    for _ in 0..n {
                        engine.tick(&mut state, now);
                    }
                }
                Command::Reset => { engine.reset(&mut state, now); }
                Command::Switch(to) => { engine.switch_session_type(&mut state, to, now); }
                Command::Settings(focus, short, long, every) => {
                    let settings = TimerSettings {
                        focus_minutes: focus,
                        short_break_minutes: short,
                        long_break_minutes: long,
                        sessions_until_long_break: every,
                    };
                    engine.apply_settings(&settings, &mut state, now);
                }
            }

            prop_assert!(state.remaining_secs <= engine.duration_for(state.session_type));
            prop_assert!(state.remaining_secs > 0);
            prop_assert!(state.completed_focus_sessions >= completed);
            completed = state.completed_focus_sessions;
        }
    }
}
