//! Core error types for focusline-core.
//!
//! Local-path failures (storage) are the only errors expected to reach a
//! caller. Remote-path failures are produced by the remote clients and
//! swallowed at the mutation engine boundary, where they degrade into
//! "record stays local-only".

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for focusline-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Local persistence errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Remote store errors
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The addressed record is not held by any local collection.
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Errors raised by a [`KeyValueStore`](crate::storage::KeyValueStore).
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing medium cannot be reached at all
    #[error("Key-value store unavailable: {0}")]
    Unavailable(String),

    /// Writing would exceed the medium's capacity
    #[error("Storage quota exceeded writing '{key}' (limit {limit} bytes)")]
    QuotaExceeded { key: String, limit: usize },

    /// SQLite backend failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Value could not be serialized for storage
    #[error("Failed to serialize value for '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a remote collection. The mutation engine treats every
/// variant identically; the distinction only feeds logs.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Network-level failure
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("Remote returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The remote rejected the payload
    #[error("Remote validation failed: {0}")]
    Validation(String),

    /// No principal, or the remote refused the credentials
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Addressed record does not exist remotely
    #[error("Remote record not found: {0}")]
    NotFound(String),

    /// No remote store is configured or reachable
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// Response body could not be decoded
    #[error("Failed to decode remote response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Malformed base URL or path
    #[error("Invalid remote URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Key not present in the configuration schema
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required text field is blank
    #[error("Field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// Numeric value outside its permitted range
    #[error("Value {value} for '{field}' is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    /// Patch payload could not be parsed (unknown or mistyped fields)
    #[error("Invalid patch: {0}")]
    InvalidPatch(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseFailed(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
