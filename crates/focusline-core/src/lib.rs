//! # Focusline Core Library
//!
//! Offline-first state synchronization and a Pomodoro-style session timer.
//! Every operation works without a network; a remote store, when
//! reachable, receives a best-effort copy. The `focusline` CLI is one
//! execution context over this library.
//!
//! ## Architecture
//!
//! - **Storage**: a [`KeyValueStore`] (SQLite or in-memory), a [`ChangeBus`]
//!   connecting execution contexts, and [`PersistedValue`], a typed,
//!   write-through value bound to one key
//! - **Records**: [`Record`] with a tagged local/remote [`RecordId`]
//! - **Sync**: the reconciler merges local-only and remote records; the
//!   [`OptimisticMutationEngine`] applies every change locally first
//! - **Timer**: [`SessionTimerEngine`] is a pure state machine over
//!   [`TimerState`]; [`SessionTimer`] persists and ticks it
//!
//! ## Key Components
//!
//! - [`OptimisticMutationEngine`]: create/update/delete with deferred sync
//! - [`SessionTimer`]: the ticking, persisted timer
//! - [`Config`]: application configuration management

pub mod error;
pub mod events;
pub mod principal;
pub mod record;
pub mod storage;
pub mod sync;
pub mod timer;

pub use error::{ConfigError, CoreError, RemoteError, StorageError, ValidationError};
pub use events::Event;
pub use principal::{PrincipalHandle, PrincipalId};
pub use record::{
    Entity, LocalId, NewRecord, Priority, Quote, QuotePatch, Record, RecordId, RemoteId,
    SessionLog, SessionLogPatch, Task, TaskPatch,
};
pub use storage::{
    ChangeBus, Config, KeyValueStore, MemoryStore, PersistedValue, RemoteConfig, SqliteStore,
    StoreHandle,
};
pub use sync::{
    CollectionView, HttpRemote, InMemoryRemote, OfflineRemote, OptimisticMutationEngine,
    RemoteCollection, RemoteCollectionClient, SyncReport,
};
pub use timer::{
    SessionTimer, SessionTimerEngine, SessionType, SettingsStore, TimerOptions, TimerSettings,
    TimerState,
};
