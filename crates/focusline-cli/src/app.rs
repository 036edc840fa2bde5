//! One execution context per process: the SQLite store, the configured
//! principal, and a remote backend chosen from `[remote]`.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use focusline_core::{
    ChangeBus, Config, Entity, HttpRemote, OfflineRemote, OptimisticMutationEngine,
    PrincipalHandle, RemoteCollection, RemoteCollectionClient, RemoteError, SessionLog,
    SessionTimer, SettingsStore, SqliteStore, StoreHandle, TimerOptions,
};

pub struct App {
    pub config: Config,
    pub handle: StoreHandle,
    pub principal: PrincipalHandle,
}

impl App {
    pub fn open() -> Result<Self, Box<dyn Error>> {
        let config = Config::load()?;
        let store = SqliteStore::open()?;
        let handle = StoreHandle::new(Arc::new(store), ChangeBus::new());
        let principal = PrincipalHandle::new(config.principal_id());
        tracing::debug!(principal = ?config.principal, remote = ?config.remote.base_url, "context opened");
        Ok(Self {
            config,
            handle,
            principal,
        })
    }

    /// Mutation engine for one collection. Without `remote.base_url` every
    /// remote call fails fast and records stay local-only.
    pub fn collection<E: Entity>(&self) -> Result<OptimisticMutationEngine<E>, RemoteError> {
        let remote = &self.config.remote;
        let backend: Arc<dyn RemoteCollection<E>> = match &remote.base_url {
            Some(base_url) => Arc::new(HttpRemote::<E>::new(
                base_url,
                remote.timeout(),
                remote.api_token.clone(),
            )?),
            None => Arc::new(OfflineRemote),
        };
        let client = RemoteCollectionClient::with_stale_after(backend, remote.stale_after());
        Ok(OptimisticMutationEngine::new(
            &self.handle,
            self.principal.clone(),
            client,
        ))
    }

    /// Timer settings for the current principal; `[timer]` in the config
    /// file applies until settings are saved through the store.
    pub fn settings(&self) -> SettingsStore {
        SettingsStore::following(&self.handle, self.principal.clone(), self.config.timer)
    }

    pub fn timer(&self, tick_interval: Duration) -> Result<SessionTimer, RemoteError> {
        let log = self.collection::<SessionLog>()?;
        let options = TimerOptions {
            principal: self.principal.clone(),
            tick_interval,
            // The foreground loop decides when to start the next session.
            auto_start_next: false,
        };
        Ok(SessionTimer::new(
            &self.handle,
            &self.settings().get(),
            Some(log),
            options,
        ))
    }
}
