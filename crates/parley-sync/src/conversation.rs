// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory state of one conversation.

use std::sync::Arc;

use parley_core::types::{ConversationId, Message, Placeholder, TaskId, TaskRecord};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::listener::DualChannelListener;
use crate::phase::TaskPhase;
use crate::projector::PendingView;
use crate::shared::Shared;

/// The conversation's single non-terminal task.
#[derive(Debug, Clone)]
pub(crate) struct ActiveTask {
    /// Distinguishes this submission from any earlier or later one.
    pub attempt: u64,
    pub record: TaskRecord,
    pub phase: TaskPhase,
    pub started: Instant,
    /// The server reported `done` but no answer reached us yet.
    pub server_done: bool,
}

impl ActiveTask {
    pub fn submitting(attempt: u64, record: TaskRecord) -> Self {
        Self {
            attempt,
            record,
            phase: TaskPhase::Submitting,
            started: Instant::now(),
            server_done: false,
        }
    }

    pub fn awaiting(attempt: u64, record: TaskRecord) -> Self {
        Self {
            phase: TaskPhase::AwaitingResult,
            ..Self::submitting(attempt, record)
        }
    }

    pub fn advance(&mut self, next: TaskPhase) {
        if !self.phase.can_transition_to(next) {
            debug!(from = %self.phase, to = %next, "unexpected task phase transition");
        }
        self.phase = next;
    }

    /// Blocks a new submit until it ends.
    pub fn blocks_submit(&self) -> bool {
        !self.server_done
    }

    pub fn pending_view(&self, label: &str) -> PendingView {
        PendingView {
            user_message_id: self.record.user_message_id.clone(),
            question_text: self.record.question_text.clone(),
            submitted_at: self.record.submitted_at,
            placeholder: Placeholder::for_task(self.record.task_id.as_ref()),
            label: label.to_string(),
        }
    }
}

pub(crate) struct InflightAsk {
    pub attempt: u64,
    pub abort: AbortHandle,
}

#[derive(Default)]
pub(crate) struct Conversation {
    pub messages: Vec<Message>,
    pub active: Option<ActiveTask>,
    pub listener: Option<DualChannelListener>,
    pub inflight_ask: Option<InflightAsk>,
}

impl Conversation {
    pub fn phase(&self) -> TaskPhase {
        self.active.as_ref().map_or(TaskPhase::Idle, |t| t.phase)
    }

    pub fn owns(&self, attempt: u64) -> bool {
        self.active.as_ref().is_some_and(|t| t.attempt == attempt)
    }

    pub fn stop_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
    }

    /// Ends the active task in `phase` and tears its listener down.
    pub fn finish(&mut self, phase: TaskPhase) -> Option<ActiveTask> {
        self.stop_listener();
        let mut task = self.active.take()?;
        task.advance(phase);
        debug!(task_id = ?task.record.task_id, phase = %phase, "task finished");
        Some(task)
    }

    /// Ensures exactly one live listener for `task_id`, replacing any
    /// listener for another task. Returns false when one was already running.
    pub fn attach_listener(
        &mut self,
        shared: &Arc<Shared>,
        conversation_id: &ConversationId,
        task_id: &TaskId,
    ) -> bool {
        if self
            .listener
            .as_ref()
            .is_some_and(|l| l.is_live() && l.task_id() == task_id)
        {
            return false;
        }
        self.stop_listener();
        self.listener = Some(DualChannelListener::start(shared, conversation_id, task_id));
        true
    }

    pub fn has_listener_for(&self, task_id: &TaskId) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|l| l.is_live() && l.task_id() == task_id)
    }
}
