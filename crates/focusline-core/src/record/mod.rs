//! Record model shared by every synchronized collection.
//!
//! A [`Record<E>`] wraps entity content `E` with identity, ownership and
//! timestamps. Identity is a tagged union: a record is born either with a
//! client-assigned [`LocalId`] or a store-assigned [`RemoteId`], and keeps
//! that namespace for life. Promotion from local to remote replaces the
//! whole record; the id of an existing record is never rewritten.

pub mod entities;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::principal::PrincipalId;

pub use entities::{Priority, Quote, QuotePatch, SessionLog, SessionLogPatch, Task, TaskPatch};

const LOCAL_PREFIX: &str = "local_";

/// Client-assigned temporary id.
///
/// Format `local_<unix-millis>_<seq>_<random>`: sortable by creation
/// within a process and collision-free across processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    pub fn generate() -> Self {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let random = uuid::Uuid::new_v4().simple().to_string();
        LocalId(format!(
            "{LOCAL_PREFIX}{}_{seq}_{}",
            Utc::now().timestamp_millis(),
            &random[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordId {
    Local(LocalId),
    Remote(RemoteId),
}

impl RecordId {
    pub fn is_local(&self) -> bool {
        matches!(self, RecordId::Local(_))
    }

    pub fn as_local(&self) -> Option<&LocalId> {
        match self {
            RecordId::Local(id) => Some(id),
            RecordId::Remote(_) => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteId> {
        match self {
            RecordId::Remote(id) => Some(id),
            RecordId::Local(_) => None,
        }
    }

    /// Interpret a user-supplied id string (CLI arguments, URLs).
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with(LOCAL_PREFIX) {
            RecordId::Local(LocalId(raw.to_string()))
        } else {
            RecordId::Remote(RemoteId(raw.to_string()))
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Local(id) => id.fmt(f),
            RecordId::Remote(id) => id.fmt(f),
        }
    }
}

impl From<LocalId> for RecordId {
    fn from(id: LocalId) -> Self {
        RecordId::Local(id)
    }
}

impl From<RemoteId> for RecordId {
    fn from(id: RemoteId) -> Self {
        RecordId::Remote(id)
    }
}

/// Content type stored in a synchronized collection.
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Singular name, used in store keys (`"task"` -> `task-state_<owner>`).
    const KIND: &'static str;

    /// Remote collection name (`"tasks"`).
    const COLLECTION: &'static str;

    /// Partial update. Unknown fields must be rejected on deserialization.
    type Patch: Clone + fmt::Debug + Default + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Check the minimal required subset of fields.
    fn validate(&self) -> Result<(), ValidationError>;

    fn apply_patch(&mut self, patch: &Self::Patch);

    /// A patch that sets every field to this entity's current content.
    fn to_patch(&self) -> Self::Patch;

    /// Parse an untyped payload into a patch, rejecting unknown fields.
    fn parse_patch(value: serde_json::Value) -> Result<Self::Patch, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::InvalidPatch(e.to_string()))
    }
}

/// One record of a synchronized collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "E: Entity")]
pub struct Record<E> {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<PrincipalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: E,
}

impl<E: Entity> Record<E> {
    /// A fresh local-only record.
    pub fn new_local(fields: E, owner_id: Option<PrincipalId>, now: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::Local(LocalId::generate()),
            owner_id,
            created_at: now,
            updated_at: now,
            fields,
        }
    }

    /// True iff this record exists only in the client's cache.
    pub fn is_local_only(&self) -> bool {
        self.id.is_local()
    }

    /// Apply a patch, bumping `updated_at`. `created_at` never changes.
    pub fn apply(&mut self, patch: &E::Patch, now: DateTime<Utc>) {
        self.fields.apply_patch(patch);
        self.updated_at = now;
    }

    /// The payload sent to a remote `create`: everything but the id.
    pub fn to_new(&self) -> NewRecord<E> {
        NewRecord {
            owner_id: self.owner_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            fields: self.fields.clone(),
        }
    }
}

/// A record without an id, as submitted to a remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "E: Entity")]
pub struct NewRecord<E> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<PrincipalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: E,
}

impl<E: Entity> NewRecord<E> {
    /// Attach a store-assigned id.
    pub fn with_id(self, id: RemoteId) -> Record<E> {
        Record {
            id: RecordId::Remote(id),
            owner_id: self.owner_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            fields: self.fields,
        }
    }
}

/// Serde helper for nullable patch fields: absent means "leave unchanged",
/// `null` means "clear".
pub(crate) mod nullable {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
