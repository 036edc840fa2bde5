//! Timer configuration.
//!
//! Durations arrive as whole minutes ([`TimerSettings`]) and are converted
//! to seconds exactly once, at this boundary ([`Durations`]). Nothing
//! downstream multiplies by 60 again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::state::SessionType;
use crate::error::{StorageError, ValidationError};
use crate::principal::{PrincipalHandle, PrincipalId};
use crate::storage::{namespaced_key, PersistedValue, StoreHandle};

const MAX_MINUTES: u32 = 180;
const MAX_SESSIONS_UNTIL_LONG_BREAK: u32 = 12;

/// User-facing timer settings, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSettings {
    #[serde(default = "default_focus_minutes")]
    pub focus_minutes: u32,
    #[serde(default = "default_short_break_minutes")]
    pub short_break_minutes: u32,
    #[serde(default = "default_long_break_minutes")]
    pub long_break_minutes: u32,
    #[serde(default = "default_sessions_until_long_break")]
    pub sessions_until_long_break: u32,
}

fn default_focus_minutes() -> u32 {
    25
}
fn default_short_break_minutes() -> u32 {
    5
}
fn default_long_break_minutes() -> u32 {
    15
}
fn default_sessions_until_long_break() -> u32 {
    4
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            focus_minutes: default_focus_minutes(),
            short_break_minutes: default_short_break_minutes(),
            long_break_minutes: default_long_break_minutes(),
            sessions_until_long_break: default_sessions_until_long_break(),
        }
    }
}

impl TimerSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let minutes = [
            ("focus_minutes", self.focus_minutes),
            ("short_break_minutes", self.short_break_minutes),
            ("long_break_minutes", self.long_break_minutes),
        ];
        for (field, value) in minutes {
            check_range(field, value, 1, MAX_MINUTES)?;
        }
        check_range(
            "sessions_until_long_break",
            self.sessions_until_long_break,
            1,
            MAX_SESSIONS_UNTIL_LONG_BREAK,
        )
    }

    /// Convert to seconds.
    pub fn durations(&self) -> Durations {
        Durations {
            focus_secs: u64::from(self.focus_minutes) * 60,
            short_break_secs: u64::from(self.short_break_minutes) * 60,
            long_break_secs: u64::from(self.long_break_minutes) * 60,
            sessions_until_long_break: self.sessions_until_long_break.max(1),
        }
    }
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value: u64::from(value),
            min: u64::from(min),
            max: u64::from(max),
        })
    }
}

/// Settings in engine units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Durations {
    pub focus_secs: u64,
    pub short_break_secs: u64,
    pub long_break_secs: u64,
    pub sessions_until_long_break: u32,
}

impl Durations {
    pub fn for_type(&self, session_type: SessionType) -> u64 {
        match session_type {
            SessionType::Focus => self.focus_secs,
            SessionType::ShortBreak => self.short_break_secs,
            SessionType::LongBreak => self.long_break_secs,
        }
    }
}

impl Default for Durations {
    fn default() -> Self {
        TimerSettings::default().durations()
    }
}

/// Timer settings persisted per principal under `settings-state_<owner>`,
/// shared across contexts like every other persisted value.
///
/// [`subscribe`](Self::subscribe) is the change signal a running timer
/// follows; values that fail validation (hand-edited storage, say) are
/// replaced by defaults when read. A store built with
/// [`following`](Self::following) rebinds to the new principal's settings
/// on sign-in/sign-out and republishes them on the same feed.
pub struct SettingsStore {
    inner: Arc<SettingsInner>,
}

struct SettingsBinding {
    principal: Option<PrincipalId>,
    value: Arc<PersistedValue<TimerSettings>>,
}

struct SettingsInner {
    handle: StoreHandle,
    principal: PrincipalHandle,
    defaults: TimerSettings,
    binding: Mutex<SettingsBinding>,
    tx: watch::Sender<TimerSettings>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SettingsInner {
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

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SettingsStore {
    pub fn new(handle: &StoreHandle, principal: Option<&PrincipalId>) -> Self {
        Self::with_defaults(handle, principal, TimerSettings::default())
    }

    /// Like [`new`](Self::new), but `defaults` stand in until settings are
    /// first saved for this principal.
    pub fn with_defaults(
        handle: &StoreHandle,
        principal: Option<&PrincipalId>,
        defaults: TimerSettings,
    ) -> Self {
        Self::following(handle, PrincipalHandle::new(principal.cloned()), defaults)
    }

    /// Settings of whoever `principal` holds, rebound as it changes.
    pub fn following(handle: &StoreHandle, principal: PrincipalHandle, defaults: TimerSettings) -> Self {
        let defaults = sanitize(defaults);
        let binding = bind(handle, principal.current(), defaults);
        let tx = watch::Sender::new(sanitize(binding.value.get()));
        let store = Self {
            inner: Arc::new(SettingsInner {
                handle: handle.clone(),
                principal,
                defaults,
                binding: Mutex::new(binding),
                tx,
                forwarder: Mutex::new(None),
            }),
        };
        let forwarder = store.spawn_forwarder();
        *lock(&store.inner.forwarder) = forwarder;
        store
    }

    pub fn get(&self) -> TimerSettings {
        sanitize(self.value().get())
    }

    /// Validate and persist new settings.
    pub fn set(&self, settings: TimerSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        self.value().set(settings)?;
        tracing::debug!(?settings, "timer settings saved");
        self.publish();
        Ok(())
    }

    /// Change feed. Values written through [`set`](Self::set) are already
    /// validated; consumers still validate what they adopt. Saves from
    /// other contexts arrive once the store's forwarding task has run.
    pub fn subscribe(&self) -> watch::Receiver<TimerSettings> {
        self.inner.tx.subscribe()
    }

    fn value(&self) -> Arc<PersistedValue<TimerSettings>> {
        self.inner.rebind_if_principal_changed();
        Arc::clone(&lock(&self.inner.binding).value)
    }

    fn publish(&self) {
        self.inner.publish(self.get());
    }

    /// Forward cross-context saves and principal switches to the feed.
    fn spawn_forwarder(&self) -> Option<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let weak = Arc::downgrade(&self.inner);
        let mut principal_rx = self.inner.principal.subscribe();
        let mut value_rx = self.value().subscribe();
        Some(runtime.spawn(async move {
            loop {
                tokio::select! {
                    changed = principal_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    // Errs once the value is unbound; resubscribed below.
                    _ = value_rx.changed() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                let store = Self { inner };
                value_rx = store.value().subscribe();
                store.publish();
            }
        }))
    }
}

impl SettingsInner {
    fn rebind_if_principal_changed(&self) {
        let current = self.principal.current();
        let mut binding = lock(&self.binding);
        if binding.principal == current {
            return;
        }
        tracing::debug!(principal = ?current, "principal changed, rebinding timer settings");
        *binding = bind(&self.handle, current, self.defaults);
    }

    fn publish(&self, settings: TimerSettings) {
        self.tx.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                *current = settings;
                true
            }
        });
    }
}

fn bind(handle: &StoreHandle, principal: Option<PrincipalId>, defaults: TimerSettings) -> SettingsBinding {
    let value = handle.persisted(namespaced_key("settings", principal.as_ref()), defaults);
    SettingsBinding {
        principal,
        value: Arc::new(value),
    }
}

fn sanitize(settings: TimerSettings) -> TimerSettings {
    match settings.validate() {
        Ok(()) => settings,
        Err(e) => {
            tracing::warn!(error = %e, "stored timer settings invalid, using defaults");
            TimerSettings::default()
        }
    }
}

/// Failure to save settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<SettingsError> for crate::error::CoreError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Invalid(e) => e.into(),
            SettingsError::Storage(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChangeBus, MemoryStore};
    use std::time::Duration;

    #[test]
    fn minutes_convert_to_seconds_once() {
        let d = TimerSettings {
            focus_minutes: 30,
            short_break_minutes: 5,
            long_break_minutes: 20,
            sessions_until_long_break: 3,
        }
        .durations();
        assert_eq!(d.for_type(SessionType::Focus), 1800);
        assert_eq!(d.for_type(SessionType::ShortBreak), 300);
        assert_eq!(d.for_type(SessionType::LongBreak), 1200);
        assert_eq!(d.sessions_until_long_break, 3);
    }

    #[test]
    fn validation_bounds() {
        assert!(TimerSettings::default().validate().is_ok());
        let zero_focus = TimerSettings {
            focus_minutes: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_focus.validate(),
            Err(ValidationError::OutOfRange { field: "focus_minutes", .. })
        ));
        let no_cadence = TimerSettings {
            sessions_until_long_break: 0,
            ..Default::default()
        };
        assert!(no_cadence.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: TimerSettings = serde_json::from_str(r#"{"focus_minutes": 50}"#).unwrap();
        assert_eq!(s.focus_minutes, 50);
        assert_eq!(s.short_break_minutes, 5);
        assert_eq!(s.sessions_until_long_break, 4);
    }

    #[test]
    fn settings_store_rejects_invalid_and_notifies() {
        let handle = StoreHandle::new(Arc::new(MemoryStore::new()), ChangeBus::new());
        let store = SettingsStore::new(&handle, None);
        let mut rx = store.subscribe();

        let bad = TimerSettings {
            long_break_minutes: 500,
            ..Default::default()
        };
        assert!(matches!(store.set(bad), Err(SettingsError::Invalid(_))));
        assert!(!rx.has_changed().unwrap());

        let good = TimerSettings {
            focus_minutes: 30,
            ..Default::default()
        };
        store.set(good).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().focus_minutes, 30);
        assert_eq!(store.get(), good);
    }

    #[test]
    fn invalid_stored_settings_read_as_default() {
        let handle = StoreHandle::new(Arc::new(MemoryStore::new()), ChangeBus::new());
        handle
            .store()
            .set("settings-state_anonymous", r#"{"focus_minutes": 0}"#)
            .unwrap();
        let store = SettingsStore::new(&handle, None);
        assert_eq!(store.get(), TimerSettings::default());
    }

    #[test]
    fn configured_defaults_apply_until_first_save() {
        let handle = StoreHandle::new(Arc::new(MemoryStore::new()), ChangeBus::new());
        let configured = TimerSettings {
            focus_minutes: 45,
            ..Default::default()
        };
        let store = SettingsStore::with_defaults(&handle, None, configured);
        assert_eq!(store.get().focus_minutes, 45);

        store.set(TimerSettings::default()).unwrap();
        let reopened = SettingsStore::with_defaults(&handle.sibling(), None, configured);
        assert_eq!(reopened.get(), TimerSettings::default());
    }

    #[tokio::test]
    async fn following_store_switches_with_principal() {
        let handle = StoreHandle::new(Arc::new(MemoryStore::new()), ChangeBus::new());
        let principal = PrincipalHandle::signed_in("u1");
        let store = SettingsStore::following(&handle, principal.clone(), TimerSettings::default());
        let thirty = TimerSettings {
            focus_minutes: 30,
            ..Default::default()
        };
        store.set(thirty).unwrap();
        let mut rx = store.subscribe();
        assert_eq!(*rx.borrow_and_update(), thirty);

        principal.sign_out();
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("settings feed was not republished")
            .unwrap();
        assert_eq!(*rx.borrow_and_update(), TimerSettings::default());
        assert_eq!(store.get(), TimerSettings::default());

        store
            .set(TimerSettings {
                focus_minutes: 50,
                ..Default::default()
            })
            .unwrap();
        let raw = handle.store().get("settings-state_u1").unwrap().unwrap();
        let kept: TimerSettings = serde_json::from_str(&raw).unwrap();
        assert_eq!(kept, thirty);
        assert!(handle.store().get("settings-state_anonymous").unwrap().is_some());
    }

    #[tokio::test]
    async fn feed_carries_saves_from_other_contexts() {
        let handle = StoreHandle::new(Arc::new(MemoryStore::new()), ChangeBus::new());
        let here = SettingsStore::new(&handle, None);
        let there = SettingsStore::new(&handle.sibling(), None);
        let mut rx = here.subscribe();

        there
            .set(TimerSettings {
                long_break_minutes: 20,
                ..Default::default()
            })
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("settings feed was not republished")
            .unwrap();
        assert_eq!(rx.borrow_and_update().long_break_minutes, 20);
    }
}
