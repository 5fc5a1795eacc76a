// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Parley pending-task engine.

use thiserror::Error;

use crate::types::ConversationId;

/// The primary error type used across all Parley adapter traits and core operations.
///
/// Only the submit preconditions ([`EmptyQuestion`](Self::EmptyQuestion),
/// [`QuestionTooLong`](Self::QuestionTooLong), [`TaskActive`](Self::TaskActive))
/// ever reach a caller of the engine. Everything else is absorbed and turned
/// into a bot message inside the conversation.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Key-value store errors (connection, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Network-level failure talking to the backend. Retried, never shown verbatim.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        /// Whether the failure looks temporary (429, 503, reset, timeout).
        retryable: bool,
        /// HTTP status code when one was received.
        status: Option<u16>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The backend reported the task itself as failed.
    #[error("remote task failed: {message}")]
    Remote { message: String },

    /// Snapshot serialization or deserialization failed.
    #[error("snapshot codec error: {source}")]
    Codec {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The question was blank after trimming.
    #[error("question is empty")]
    EmptyQuestion,

    /// The question exceeds the configured maximum length.
    #[error("question too long ({len}/{max} characters)")]
    QuestionTooLong { len: usize, max: usize },

    /// Another task is still in flight for this conversation.
    #[error("a task is already active for conversation {conversation_id}")]
    TaskActive { conversation_id: ConversationId },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    /// Convenience constructor for a transport failure without a source.
    pub fn transport(message: impl Into<String>, retryable: bool, status: Option<u16>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable,
            status,
            source: None,
        }
    }

    /// True when retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { retryable: true, .. } | Self::Timeout { .. })
    }

    /// True for HTTP 429 responses.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Transport { status: Some(429), .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ParleyError::transport("reset", true, None).is_retryable());
        assert!(!ParleyError::transport("bad request", false, Some(400)).is_retryable());
        assert!(
            ParleyError::Timeout {
                duration: std::time::Duration::from_secs(25)
            }
            .is_retryable()
        );
        assert!(!ParleyError::EmptyQuestion.is_retryable());
    }

    #[test]
    fn rate_limit_detection() {
        assert!(ParleyError::transport("slow down", true, Some(429)).is_rate_limited());
        assert!(!ParleyError::transport("unavailable", true, Some(503)).is_rate_limited());
    }

    #[test]
    fn task_active_message_names_conversation() {
        let err = ParleyError::TaskActive {
            conversation_id: ConversationId::from("42"),
        };
        assert_eq!(err.to_string(), "a task is already active for conversation 42");
    }
}
