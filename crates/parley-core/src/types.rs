// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Parley engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a conversation (one chat room).
    ConversationId
);
string_id!(
    /// Server-assigned identifier of a long-running question task.
    TaskId
);
string_id!(
    /// Backend correlation id of the persisted question row.
    QnaId
);
string_id!(
    /// Identifier of a message in a conversation.
    MessageId
);

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter plugged into the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Backend,
    Push,
    Storage,
}

/// Who wrote a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Bot,
}

/// Identity of the single "still working" bubble in a conversation.
///
/// A placeholder starts as [`Generic`](Self::Generic) while the ask call is in
/// flight and is upgraded exactly once to [`ForTask`](Self::ForTask) when the
/// server hands out a task id. Compared structurally, never by string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "taskId", rename_all = "camelCase")]
pub enum Placeholder {
    Generic,
    ForTask(TaskId),
}

impl Placeholder {
    /// Placeholder for an optional task id.
    pub fn for_task(task_id: Option<&TaskId>) -> Self {
        match task_id {
            Some(id) => Self::ForTask(id.clone()),
            None => Self::Generic,
        }
    }

    /// The message id the placeholder occupies in the message list.
    pub fn message_id(&self) -> MessageId {
        MessageId(self.to_string())
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Generic => None,
            Self::ForTask(id) => Some(id),
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => f.write_str("pending-generic"),
            Self::ForTask(id) => write!(f, "pending-{id}"),
        }
    }
}

/// One entry of a conversation's ordered message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub author: Author,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Set only on the pending bot bubble. Never persisted to history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<Placeholder>,
}

impl Message {
    pub fn user(id: MessageId, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            author: Author::User,
            text: text.into(),
            created_at,
            placeholder: None,
        }
    }

    pub fn bot(id: MessageId, text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            author: Author::Bot,
            text: text.into(),
            created_at,
            placeholder: None,
        }
    }

    /// The pending bot bubble for `placeholder`.
    pub fn pending(
        placeholder: Placeholder,
        label: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: placeholder.message_id(),
            author: Author::Bot,
            text: label.into(),
            created_at,
            placeholder: Some(placeholder),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.placeholder.is_some()
    }
}

impl From<&HistoryRow> for Message {
    fn from(row: &HistoryRow) -> Self {
        Self {
            id: row.id.clone(),
            author: row.author,
            text: row.text.clone(),
            created_at: row.created_at,
            placeholder: None,
        }
    }
}

/// A row of authoritative server history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    pub id: MessageId,
    pub author: Author,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// The single in-flight question of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Absent until the ask call returns.
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub qna_id: Option<QnaId>,
    /// The optimistic user message this task answers.
    pub user_message_id: MessageId,
    pub question_text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub submitted_at: DateTime<Utc>,
}

/// Result of the ask operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskReceipt {
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub qna_id: Option<QnaId>,
}

/// Server-side progress of a task as reported by the status operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Done,
    Failed,
    Error,
    /// Anything the backend sends that this client does not recognise.
    Unknown(String),
}

impl TaskState {
    /// Still being worked on (keep polling at the regular cadence).
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// Terminal failure reported by the backend.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => f.write_str("queued"),
            Self::Running => f.write_str("running"),
            Self::Done => f.write_str("done"),
            Self::Failed => f.write_str("failed"),
            Self::Error => f.write_str("error"),
            Self::Unknown(other) => f.write_str(other),
        }
    }
}

impl From<&str> for TaskState {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "running" => Self::Running,
            "done" => Self::Done,
            "failed" => Self::Failed,
            "error" => Self::Error,
            _ => Self::Unknown(value.to_string()),
        }
    }
}

impl Serialize for TaskState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TaskState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// Result of the status operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TaskStatus {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            error_message: None,
        }
    }
}

/// A message delivered by the push transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default, alias = "chatId")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub text: String,
}

impl PushPayload {
    /// True when the payload carries an answer worth showing.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}
