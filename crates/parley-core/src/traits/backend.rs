// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Question/answer backend trait (the HTTP side of the system).

use async_trait::async_trait;

use crate::error::ParleyError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{AskReceipt, ConversationId, HistoryRow, QnaId, TaskId, TaskStatus};

/// Remote operations the engine needs from the answer-generation service.
///
/// Implementations only move data; retry, backoff and cancellation policy
/// live in the engine. Network failures should be reported as
/// [`ParleyError::Transport`] with `retryable` set for temporary conditions.
#[async_trait]
pub trait QnaBackend: PluginAdapter {
    /// Submits a question. The receipt's `task_id` may be absent.
    async fn ask(
        &self,
        conversation_id: &ConversationId,
        question: &str,
    ) -> Result<AskReceipt, ParleyError>;

    /// Reports the current state of a task.
    async fn status(&self, task_id: &TaskId) -> Result<TaskStatus, ParleyError>;

    /// Asks the backend to stop working on a task.
    async fn cancel(
        &self,
        task_id: &TaskId,
        qna_id: Option<&QnaId>,
        conversation_id: &ConversationId,
    ) -> Result<(), ParleyError>;

    /// Durably records a client-synthesized answer for a failed task.
    async fn save_fallback_answer(
        &self,
        task_id: &TaskId,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<(), ParleyError>;

    /// Returns the authoritative history of a conversation, oldest first.
    async fn history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<HistoryRow>, ParleyError>;
}
