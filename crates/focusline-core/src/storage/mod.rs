mod change_bus;
mod config;
mod kv;
mod persisted;
mod sqlite;

pub use change_bus::{ChangeBus, ChangeNotice, ContextId, Subscription};
pub use config::{Config, RemoteConfig};
pub use kv::{KeyValueStore, MemoryStore};
pub use persisted::{PersistedValue, StoreHandle};
pub use sqlite::SqliteStore;

use std::path::PathBuf;

use crate::principal::PrincipalId;

/// Namespace used for state that belongs to no principal.
pub const ANONYMOUS_NAMESPACE: &str = "anonymous";

/// Store key for one logical entity type under one principal:
/// `"<entity>-state_<principal|anonymous>"`.
///
/// Switching principal switches key, so a previous principal's state is
/// never visible to the next one.
pub fn namespaced_key(entity: &str, principal: Option<&PrincipalId>) -> String {
    let owner = principal.map_or(ANONYMOUS_NAMESPACE, PrincipalId::as_str);
    format!("{entity}-state_{owner}")
}

/// Returns the data directory.
///
/// `FOCUSLINE_DATA_DIR` wins if set. Otherwise `~/.config/focusline[-dev]/`
/// based on `FOCUSLINE_ENV` (set `FOCUSLINE_ENV=dev` for the development
/// directory).
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let dir = match std::env::var_os("FOCUSLINE_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("FOCUSLINE_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("focusline-dev")
            } else {
                base_dir.join("focusline")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
