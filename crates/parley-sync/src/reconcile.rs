// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciles the persisted snapshot with authoritative history on
//! conversation load and app refocus.
//!
//! In order: a cancelled snapshot drops pending state; a snapshot that is
//! not sending shows history as-is; a sending snapshot older than the TTL
//! is swept without reissuing; an answer recorded since the question
//! settles the task; a known task id resumes listening; otherwise the
//! question is asked again unless history shows it already arrived.
//!
//! Running it twice with the same inputs gives the same list and never
//! starts a second listener or a second ask.

use std::sync::Arc;

use chrono::Utc;
use parley_core::types::{Author, ConversationId, HistoryRow, Message, Placeholder, TaskRecord};
use tracing::{debug, info, warn};

use crate::conversation::{ActiveTask, Conversation};
use crate::phase::TaskPhase;
use crate::projector::{has_answer_since, project, PendingView};
use crate::shared::Shared;
use crate::snapshot::Snapshot;
use crate::submitter;

pub(crate) async fn reconcile(
    shared: &Arc<Shared>,
    conversation_id: &ConversationId,
    rows: Vec<HistoryRow>,
) -> Vec<Message> {
    let snapshot = shared.gateway.load(conversation_id).await;
    let mut reissue: Option<(u64, TaskRecord)> = None;
    let mut messages = Vec::new();

    shared
        .gateway
        .save_if(conversation_id, || {
            shared.with_conversation(conversation_id, |conversation| {
                let write = decide(
                    shared,
                    conversation_id,
                    conversation,
                    &snapshot,
                    &rows,
                    &mut reissue,
                );
                messages = conversation.messages.clone();
                write
            })
        })
        .await;

    if let Some((attempt, record)) = reissue {
        info!(conversation_id = %conversation_id, "reissuing question that never reached the server");
        let shared = shared.clone();
        let conversation_id = conversation_id.clone();
        tokio::spawn(async move {
            let outcome = submitter::dispatch(&shared, &conversation_id, attempt, record).await;
            debug!(conversation_id = %conversation_id, ?outcome, "reissue finished");
        });
    }
    messages
}

/// Applies the reconciliation rules to the in-memory state and returns the
/// snapshot to write, if any.
fn decide(
    shared: &Arc<Shared>,
    conversation_id: &ConversationId,
    conversation: &mut Conversation,
    snapshot: &Snapshot,
    rows: &[HistoryRow],
    reissue: &mut Option<(u64, TaskRecord)>,
) -> Option<Snapshot> {
    let label = shared.texts.pending_label.as_str();
    let now = Utc::now();
    let ttl = chrono::Duration::seconds(
        i64::try_from(shared.config.staleness_ttl_secs).unwrap_or(i64::MAX),
    );
    let stale = snapshot.sending && snapshot.is_stale(now, ttl);

    if let Some(task) = &conversation.active
        && task.phase == TaskPhase::Submitting
    {
        if !stale {
            // This process is still asking; its own writes will follow.
            let view = task.pending_view(label);
            conversation.messages = project(rows, Some(&view));
            return None;
        }
        // The ask stopped refreshing its snapshot; give up on it.
        if let Some(ask) = conversation.inflight_ask.take() {
            debug!(conversation_id = %conversation_id, attempt = ask.attempt, "aborting ask of a stale submission");
            ask.abort.abort();
        }
    }

    if snapshot.cancelled_at.is_some() {
        conversation.finish(TaskPhase::Cancelled);
        conversation.messages = project(rows, None);
        return None;
    }

    if !snapshot.sending {
        if let Some(repair) = live_task_record(conversation) {
            warn!(conversation_id = %conversation_id, "snapshot lost a live task, rewriting it");
            return resume(shared, conversation_id, conversation, rows, repair, now);
        }
        conversation.finish(TaskPhase::Resolved);
        conversation.messages = project(rows, None);
        return None;
    }

    let Some(record) = snapshot.task_record.clone().filter(|_| !stale) else {
        info!(conversation_id = %conversation_id, saved_at = %snapshot.saved_at, "sweeping stale pending state");
        conversation.finish(TaskPhase::Stale);
        conversation.messages = project(rows, None);
        return Some(Snapshot::idle(conversation_id.clone(), now));
    };

    if has_answer_since(rows, snapshot.pending_timestamp()) {
        info!(conversation_id = %conversation_id, task_id = ?record.task_id, "answer arrived while away");
        conversation.finish(TaskPhase::Resolved);
        conversation.messages = project(rows, None);
        return Some(Snapshot::idle(conversation_id.clone(), now));
    }

    if record.task_id.is_some() {
        return resume(shared, conversation_id, conversation, rows, record, now);
    }

    let view = PendingView {
        user_message_id: record.user_message_id.clone(),
        question_text: record.question_text.clone(),
        submitted_at: record.submitted_at,
        placeholder: Placeholder::Generic,
        label: label.to_string(),
    };
    if question_reached_server(rows, &view) {
        info!(conversation_id = %conversation_id, "question already recorded, not reissuing");
        conversation.finish(TaskPhase::Stale);
        conversation.messages = project(rows, None);
        return Some(Snapshot::idle(conversation_id.clone(), now));
    }

    conversation.finish(TaskPhase::Stale);
    let attempt = shared.next_attempt();
    conversation.active = Some(ActiveTask::submitting(attempt, record.clone()));
    conversation.messages = project(rows, Some(&view));
    *reissue = Some((attempt, record.clone()));
    Some(Snapshot::sending(conversation_id.clone(), record, now))
}

/// Re-attaches the placeholder and the listener for a task with a known id.
fn resume(
    shared: &Arc<Shared>,
    conversation_id: &ConversationId,
    conversation: &mut Conversation,
    rows: &[HistoryRow],
    record: TaskRecord,
    now: chrono::DateTime<Utc>,
) -> Option<Snapshot> {
    let task_id = record.task_id.clone()?;
    let same_task = conversation
        .active
        .as_ref()
        .is_some_and(|t| t.record.task_id.as_ref() == Some(&task_id) && !t.server_done);
    if !same_task {
        conversation.finish(TaskPhase::Stale);
        conversation.active = Some(ActiveTask::awaiting(shared.next_attempt(), record.clone()));
    }

    let view = PendingView {
        user_message_id: record.user_message_id.clone(),
        question_text: record.question_text.clone(),
        submitted_at: record.submitted_at,
        placeholder: Placeholder::ForTask(task_id.clone()),
        label: shared.texts.pending_label.clone(),
    };
    conversation.messages = project(rows, Some(&view));

    if conversation.attach_listener(shared, conversation_id, &task_id) {
        info!(conversation_id = %conversation_id, task_id = %task_id, "resumed listening");
    } else {
        debug!(conversation_id = %conversation_id, task_id = %task_id, "listener already running");
    }
    Some(Snapshot::sending(conversation_id.clone(), record, now))
}

/// The record of a task this process is still listening for.
fn live_task_record(conversation: &Conversation) -> Option<TaskRecord> {
    let task = conversation.active.as_ref()?;
    let task_id = task.record.task_id.as_ref()?;
    (task.phase == TaskPhase::AwaitingResult
        && !task.server_done
        && conversation.has_listener_for(task_id))
    .then(|| task.record.clone())
}

fn question_reached_server(rows: &[HistoryRow], view: &PendingView) -> bool {
    let question = view.question_text.trim();
    rows.iter().any(|row| {
        row.author == Author::User
            && row.text.trim() == question
            && row.created_at >= view.submitted_at
    })
}
