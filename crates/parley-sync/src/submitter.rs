// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Starts a task: optimistic messages, the first snapshot, then the ask call.
//!
//! The ask call is single-flight per conversation. Dispatching a new one
//! aborts whichever call is still pending. Once a call returns, only the
//! attempt that still owns the conversation's task record may act on it.

use std::sync::Arc;

use chrono::Utc;
use parley_core::types::{
    AskReceipt, ConversationId, Message, MessageId, Placeholder, TaskId, TaskRecord,
};
use parley_core::ParleyError;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::backoff::millis;
use crate::conversation::{ActiveTask, InflightAsk};
use crate::phase::TaskPhase;
use crate::projector::{ensure_placeholder, remove_placeholder};
use crate::shared::Shared;
use crate::snapshot::Snapshot;

/// How a submission ended, from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The server accepted the question and a listener is waiting for the answer.
    Started { task_id: TaskId },
    /// The ask failed; a failure message was added to the conversation.
    Failed,
    /// A newer submission aborted this one's ask call.
    Superseded,
    /// The ask returned after the user cancelled; its task was cancelled too.
    Discarded,
}

pub(crate) async fn submit(
    shared: &Arc<Shared>,
    conversation_id: &ConversationId,
    question: &str,
) -> Result<SubmitOutcome, ParleyError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ParleyError::EmptyQuestion);
    }
    let len = question.chars().count();
    let max = shared.config.max_question_len;
    if len > max {
        return Err(ParleyError::QuestionTooLong { len, max });
    }

    let now = Utc::now();
    let attempt = shared.next_attempt();
    let record = TaskRecord {
        task_id: None,
        qna_id: None,
        user_message_id: MessageId(uuid::Uuid::new_v4().to_string()),
        question_text: question.to_string(),
        submitted_at: now,
    };

    let mut rejected = false;
    shared
        .gateway
        .save_if(conversation_id, || {
            shared.with_conversation(conversation_id, |conversation| {
                if let Some(active) = &conversation.active {
                    if active.blocks_submit() {
                        rejected = true;
                        return None;
                    }
                    // Done on the server but never answered: the new question replaces it.
                    remove_placeholder(&mut conversation.messages);
                    conversation.finish(TaskPhase::Resolved);
                }
                conversation.messages.push(Message::user(
                    record.user_message_id.clone(),
                    question,
                    now,
                ));
                ensure_placeholder(
                    &mut conversation.messages,
                    Placeholder::Generic,
                    &shared.texts.pending_label,
                    now,
                );
                conversation.active = Some(ActiveTask::submitting(attempt, record.clone()));
                Some(Snapshot::sending(conversation_id.clone(), record.clone(), now))
            })
        })
        .await;

    if rejected {
        debug!(conversation_id = %conversation_id, "submit rejected, task already active");
        return Err(ParleyError::TaskActive {
            conversation_id: conversation_id.clone(),
        });
    }
    info!(conversation_id = %conversation_id, attempt, "question submitted");
    Ok(dispatch(shared, conversation_id, attempt, record).await)
}

/// Runs the ask call for `attempt` and applies its result.
pub(crate) async fn dispatch(
    shared: &Arc<Shared>,
    conversation_id: &ConversationId,
    attempt: u64,
    record: TaskRecord,
) -> SubmitOutcome {
    let call = {
        let shared = shared.clone();
        let conversation_id = conversation_id.clone();
        let question = record.question_text.clone();
        tokio::spawn(
            async move { ask_with_retry(&shared, &conversation_id, attempt, &question).await },
        )
    };

    let previous = shared.with_conversation(conversation_id, |conversation| {
        conversation.inflight_ask.replace(InflightAsk {
            attempt,
            abort: call.abort_handle(),
        })
    });
    if let Some(previous) = previous {
        debug!(conversation_id = %conversation_id, superseded = previous.attempt, "aborting previous ask");
        previous.abort.abort();
    }

    let result = call.await;
    shared.with_conversation(conversation_id, |conversation| {
        if conversation
            .inflight_ask
            .as_ref()
            .is_some_and(|ask| ask.attempt == attempt)
        {
            conversation.inflight_ask = None;
        }
    });

    let result = match result {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => {
            info!(conversation_id = %conversation_id, attempt, "ask superseded");
            return SubmitOutcome::Superseded;
        }
        Err(e) => Err(ParleyError::Internal(format!("ask task panicked: {e}"))),
    };

    match result {
        Ok(AskReceipt {
            task_id: Some(task_id),
            qna_id,
        }) => accept(shared, conversation_id, attempt, task_id, qna_id).await,
        Ok(AskReceipt { task_id: None, .. }) => {
            let error = ParleyError::Remote {
                message: "ask returned no task id".to_string(),
            };
            reject(shared, conversation_id, attempt, &error).await
        }
        Err(error) => reject(shared, conversation_id, attempt, &error).await,
    }
}

async fn accept(
    shared: &Arc<Shared>,
    conversation_id: &ConversationId,
    attempt: u64,
    task_id: TaskId,
    qna_id: Option<parley_core::types::QnaId>,
) -> SubmitOutcome {
    let mut started = false;
    shared
        .gateway
        .save_if(conversation_id, || {
            shared.with_conversation(conversation_id, |conversation| {
                let task = conversation
                    .active
                    .as_mut()
                    .filter(|t| t.attempt == attempt && t.phase == TaskPhase::Submitting)?;
                task.record.task_id = Some(task_id.clone());
                task.record.qna_id = qna_id.clone();
                task.advance(TaskPhase::AwaitingResult);
                let record = task.record.clone();
                ensure_placeholder(
                    &mut conversation.messages,
                    Placeholder::ForTask(task_id.clone()),
                    &shared.texts.pending_label,
                    record.submitted_at,
                );
                conversation.attach_listener(shared, conversation_id, &task_id);
                started = true;
                Some(Snapshot::sending(conversation_id.clone(), record, Utc::now()))
            })
        })
        .await;

    if started {
        info!(conversation_id = %conversation_id, task_id = %task_id, "task started");
        return SubmitOutcome::Started { task_id };
    }

    // Nobody is waiting for this task any more.
    info!(conversation_id = %conversation_id, task_id = %task_id, "cancelling orphaned task");
    if let Err(e) = shared
        .backend
        .cancel(&task_id, qna_id.as_ref(), conversation_id)
        .await
    {
        warn!(task_id = %task_id, error = %e, "orphan cancel failed");
    }
    SubmitOutcome::Discarded
}

async fn reject(
    shared: &Arc<Shared>,
    conversation_id: &ConversationId,
    attempt: u64,
    error: &ParleyError,
) -> SubmitOutcome {
    let text = if error.is_rate_limited() {
        shared.texts.ask_rate_limited.clone()
    } else {
        shared.texts.ask_failed.clone()
    };

    let failed = shared
        .gateway
        .save_if(conversation_id, || {
            shared.with_conversation(conversation_id, |conversation| {
                if !conversation.owns(attempt) {
                    return None;
                }
                remove_placeholder(&mut conversation.messages);
                conversation.messages.push(Message::bot(
                    MessageId(format!("error-{}", uuid::Uuid::new_v4())),
                    text,
                    Utc::now(),
                ));
                conversation.finish(TaskPhase::Failed);
                Some(Snapshot::idle(conversation_id.clone(), Utc::now()))
            })
        })
        .await;

    if failed {
        warn!(conversation_id = %conversation_id, error = %error, "ask failed");
        SubmitOutcome::Failed
    } else {
        debug!(conversation_id = %conversation_id, error = %error, "ask failed after the user moved on");
        SubmitOutcome::Discarded
    }
}

async fn ask_with_retry(
    shared: &Shared,
    conversation_id: &ConversationId,
    attempt: u64,
    question: &str,
) -> Result<AskReceipt, ParleyError> {
    let deadline = millis(shared.config.ask_timeout_ms);
    let mut retry = 0u32;
    loop {
        shared.ask_slot().await;
        let result = match timeout(deadline, shared.backend.ask(conversation_id, question)).await {
            Ok(result) => result,
            Err(_) => Err(ParleyError::Timeout { duration: deadline }),
        };
        match result {
            Ok(receipt) => return Ok(receipt),
            Err(e) if e.is_retryable() && retry < shared.config.ask_max_retries => {
                let delay_ms = shared
                    .config
                    .ask_base_backoff_ms
                    .saturating_mul(1u64 << retry.min(16));
                warn!(conversation_id = %conversation_id, retry, delay_ms, error = %e, "ask failed, retrying");
                sleep(millis(delay_ms)).await;
                refresh_submitting(shared, conversation_id, attempt).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Keeps a retrying ask's snapshot fresh so reconciliation does not sweep it.
async fn refresh_submitting(shared: &Shared, conversation_id: &ConversationId, attempt: u64) {
    shared
        .gateway
        .save_if(conversation_id, || {
            shared.with_conversation(conversation_id, |conversation| {
                let task = conversation
                    .active
                    .as_ref()
                    .filter(|t| t.attempt == attempt && t.phase == TaskPhase::Submitting)?;
                Some(Snapshot::sending(
                    conversation_id.clone(),
                    task.record.clone(),
                    Utc::now(),
                ))
            })
        })
        .await;
}
