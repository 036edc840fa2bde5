//! The current principal (authenticated user) boundary.
//!
//! Authentication itself happens elsewhere; the core only needs to know
//! who is signed in right now, and to notice when that changes. `None`
//! is anonymous, local-only mode: every remote call short-circuits.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Opaque identifier of an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reactive holder of the current principal.
///
/// Clones share the same slot. Consumers either read
/// [`current`](Self::current) on each operation or watch
/// [`subscribe`](Self::subscribe) for sign-in/sign-out.
#[derive(Debug, Clone)]
pub struct PrincipalHandle {
    tx: std::sync::Arc<watch::Sender<Option<PrincipalId>>>,
}

impl PrincipalHandle {
    pub fn new(initial: Option<PrincipalId>) -> Self {
        Self {
            tx: std::sync::Arc::new(watch::Sender::new(initial)),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(None)
    }

    pub fn signed_in(id: impl Into<String>) -> Self {
        Self::new(Some(PrincipalId::new(id)))
    }

    pub fn current(&self) -> Option<PrincipalId> {
        self.tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Replace the current principal. No-op if unchanged.
    pub fn set(&self, principal: Option<PrincipalId>) {
        self.tx.send_if_modified(|slot| {
            if *slot == principal {
                false
            } else {
                tracing::info!(
                    from = ?slot.as_ref().map(PrincipalId::as_str),
                    to = ?principal.as_ref().map(PrincipalId::as_str),
                    "principal changed"
                );
                *slot = principal;
                true
            }
        });
    }

    pub fn sign_out(&self) {
        self.set(None);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PrincipalId>> {
        self.tx.subscribe()
    }
}

impl Default for PrincipalHandle {
    fn default() -> Self {
        Self::anonymous()
    }
}
