//! Concrete entity types: tasks, quotes, and the session log.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{nullable, Entity};
use crate::error::ValidationError;
use crate::timer::SessionType;

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl std::str::FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(ValidationError::InvalidPatch(format!(
                "unknown priority '{other}'"
            ))),
        }
    }
}

// ── Task ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            category: None,
            priority: None,
            completed: false,
            due_date: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Partial update for [`Task`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable::deserialize"
    )]
    pub description: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable::deserialize"
    )]
    pub category: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable::deserialize"
    )]
    pub priority: Option<Option<Priority>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable::deserialize"
    )]
    pub due_date: Option<Option<NaiveDate>>,
}

impl Entity for Task {
    const KIND: &'static str = "task";
    const COLLECTION: &'static str = "tasks";
    type Patch = TaskPatch;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyField("title"));
        }
        Ok(())
    }

    fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
    }

    fn to_patch(&self) -> TaskPatch {
        TaskPatch {
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            category: Some(self.category.clone()),
            priority: Some(self.priority),
            completed: Some(self.completed),
            due_date: Some(self.due_date),
        }
    }
}

// ── Quote ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Quote {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            author: None,
            category: None,
        }
    }

    pub fn by(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Partial update for [`Quote`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable::deserialize"
    )]
    pub author: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable::deserialize"
    )]
    pub category: Option<Option<String>>,
}

impl Entity for Quote {
    const KIND: &'static str = "quote";
    const COLLECTION: &'static str = "quotes";
    type Patch = QuotePatch;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.content.trim().is_empty() {
            return Err(ValidationError::EmptyField("content"));
        }
        Ok(())
    }

    fn apply_patch(&mut self, patch: &QuotePatch) {
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(author) = &patch.author {
            self.author = author.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
    }

    fn to_patch(&self) -> QuotePatch {
        QuotePatch {
            content: Some(self.content.clone()),
            author: Some(self.author.clone()),
            category: Some(self.category.clone()),
        }
    }
}

// ── Session log ──────────────────────────────────────────────────────

/// One timer session, written when the session starts and marked
/// completed when it runs to zero. Abandoned sessions stay
/// `completed = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    pub session_type: SessionType,
    pub duration_secs: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionLog {
    pub fn started(session_type: SessionType, duration_secs: u64, at: DateTime<Utc>) -> Self {
        Self {
            session_type,
            duration_secs,
            started_at: at,
            completed: false,
            completed_at: None,
        }
    }
}

/// Partial update for [`SessionLog`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionLogPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable::deserialize"
    )]
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl SessionLogPatch {
    pub fn completed_at(at: DateTime<Utc>) -> Self {
        Self {
            completed: Some(true),
            completed_at: Some(Some(at)),
        }
    }
}

impl Entity for SessionLog {
    const KIND: &'static str = "session";
    const COLLECTION: &'static str = "sessions";
    type Patch = SessionLogPatch;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.duration_secs == 0 {
            return Err(ValidationError::OutOfRange {
                field: "duration_secs",
                value: 0,
                min: 1,
                max: u64::MAX,
            });
        }
        Ok(())
    }

    fn apply_patch(&mut self, patch: &SessionLogPatch) {
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
    }

    fn to_patch(&self) -> SessionLogPatch {
        SessionLogPatch {
            completed: Some(self.completed),
            completed_at: Some(self.completed_at),
        }
    }
}
