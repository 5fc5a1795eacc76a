// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! User-initiated cancellation of the active task.

use std::sync::Arc;

use chrono::Utc;
use parley_core::types::{ConversationId, TaskRecord};
use tracing::{debug, info, warn};

use crate::phase::TaskPhase;
use crate::shared::Shared;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Nothing was in flight. No remote call was made and nothing was written.
    NoActiveTask,
}

/// Drops the optimistic question and its placeholder, marks the snapshot
/// cancelled, stops the listener, and asks the server to stop. The remote
/// cancel is best-effort; its failure is only logged.
///
/// An ask still in flight is left to finish. If it later yields a task id,
/// the submitter cancels that orphan.
pub(crate) async fn cancel(shared: &Arc<Shared>, conversation_id: &ConversationId) -> CancelOutcome {
    let mut cancelled: Option<TaskRecord> = None;
    shared
        .gateway
        .save_if(conversation_id, || {
            shared.with_conversation(conversation_id, |conversation| {
                if !conversation.active.as_ref()?.blocks_submit() {
                    return None;
                }
                let task = conversation.finish(TaskPhase::Cancelled)?;
                let user_message_id = task.record.user_message_id.clone();
                conversation
                    .messages
                    .retain(|m| m.id != user_message_id && !m.is_pending());
                cancelled = Some(task.record);
                Some(Snapshot::cancelled(conversation_id.clone(), Utc::now()))
            })
        })
        .await;

    let Some(record) = cancelled else {
        debug!(conversation_id = %conversation_id, "cancel ignored, no active task");
        return CancelOutcome::NoActiveTask;
    };

    match &record.task_id {
        Some(task_id) => {
            if let Err(e) = shared
                .backend
                .cancel(task_id, record.qna_id.as_ref(), conversation_id)
                .await
            {
                warn!(conversation_id = %conversation_id, task_id = %task_id, error = %e, "remote cancel failed");
            }
        }
        None => debug!(conversation_id = %conversation_id, "cancelled before the server assigned a task id"),
    }
    info!(conversation_id = %conversation_id, task_id = ?record.task_id, "task cancelled");
    CancelOutcome::Cancelled
}
