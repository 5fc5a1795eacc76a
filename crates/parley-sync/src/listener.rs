// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-task listener racing the push channel against a polling loop.
//!
//! One spawned task owns the push subscription, the poll timer and the
//! heartbeat timer. A status call in flight is one more branch of the same
//! select, so a slow server never holds up the heartbeat, a pushed answer or
//! a stop. Stopping the listener cancels its token; the task then drops the
//! subscription and any status call still in flight on its way out. Results
//! are ignored once the listener no longer owns the conversation's task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use parley_core::types::{ConversationId, Message, MessageId, TaskId, TaskState};
use parley_core::PushSubscription;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::millis;
use crate::conversation::Conversation;
use crate::phase::TaskPhase;
use crate::projector::{
    latest_answer_since, remove_placeholder, replace_placeholder, upgrade_placeholder,
};
use crate::shared::Shared;
use crate::snapshot::Snapshot;

/// Handle to a running listener. Dropping it stops the listener.
#[derive(Debug)]
pub struct DualChannelListener {
    id: u64,
    task_id: TaskId,
    token: CancellationToken,
}

impl DualChannelListener {
    /// Subscribes to `task_id` on the push transport and spawns the poll loop.
    pub(crate) fn start(
        shared: &Arc<Shared>,
        conversation_id: &ConversationId,
        task_id: &TaskId,
    ) -> Self {
        let id = shared.next_listener_id();
        let token = shared.shutdown.child_token();
        let subscription = shared.push.subscribe(task_id);
        let worker = Worker {
            shared: shared.clone(),
            conversation_id: conversation_id.clone(),
            task_id: task_id.clone(),
            id,
            token: token.clone(),
        };
        tokio::spawn(worker.run(subscription));
        info!(conversation_id = %conversation_id, task_id = %task_id, listener = id, "listener started");
        Self {
            id,
            task_id: task_id.clone(),
            token,
        }
    }

    /// Idempotent.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            debug!(task_id = %self.task_id, listener = self.id, "listener stopping");
            self.token.cancel();
        }
    }

    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for DualChannelListener {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

enum Step {
    Continue,
    StopPolling,
    Exit,
}

type PollResult = (Step, Option<u64>);
type InflightPoll<'a> = Pin<Box<dyn Future<Output = PollResult> + Send + 'a>>;

/// Completes with the in-flight status call, or never when there is none.
async fn in_flight(poll: &mut Option<InflightPoll<'_>>) -> PollResult {
    match poll {
        Some(poll) => poll.await,
        None => std::future::pending().await,
    }
}

struct Worker {
    shared: Arc<Shared>,
    conversation_id: ConversationId,
    task_id: TaskId,
    id: u64,
    token: CancellationToken,
}

impl Worker {
    async fn run(self, mut subscription: PushSubscription) {
        let schedule = self.shared.schedule;
        let mut delay = schedule.initial();
        let mut polling = true;
        let mut push_open = true;

        let poll = sleep(millis(delay));
        tokio::pin!(poll);
        let mut inflight: Option<InflightPoll<'_>> = None;

        let period = std::time::Duration::from_secs(self.shared.config.heartbeat_interval_secs);
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                biased;
                _ = self.token.cancelled() => Step::Exit,
                payload = subscription.recv(), if push_open => match payload {
                    Some(payload) if payload.has_text() => {
                        debug!(task_id = %self.task_id, "answer pushed");
                        self.resolve(payload.text).await;
                        Step::Exit
                    }
                    Some(_) => Step::Continue,
                    None => {
                        debug!(task_id = %self.task_id, "push channel closed");
                        push_open = false;
                        if polling { Step::Continue } else { Step::Exit }
                    }
                },
                _ = heartbeat.tick(), if polling => {
                    self.shared.gateway.touch(&self.conversation_id, &self.task_id).await;
                    Step::Continue
                },
                (step, next) = in_flight(&mut inflight), if inflight.is_some() => {
                    inflight = None;
                    if let Some(next) = next {
                        delay = next;
                        debug!(task_id = %self.task_id, delay_ms = delay, "next poll scheduled");
                        poll.as_mut().reset(Instant::now() + millis(delay));
                    }
                    step
                },
                _ = &mut poll, if polling && inflight.is_none() => {
                    inflight = Some(Box::pin(self.poll_once(delay)));
                    Step::Continue
                },
            };

            match step {
                Step::Continue => {}
                Step::StopPolling => {
                    polling = false;
                    if !push_open {
                        break;
                    }
                }
                Step::Exit => break,
            }
        }

        subscription.unsubscribe();
        debug!(task_id = %self.task_id, listener = self.id, "listener exited");
    }

    /// One status round trip. Returns what to do next and, when polling
    /// continues, the next delay.
    async fn poll_once(&self, delay: u64) -> (Step, Option<u64>) {
        let schedule = self.shared.schedule;
        match self.shared.backend.status(&self.task_id).await {
            Ok(status) if status.state.is_in_progress() => {
                if !self.refresh() {
                    return (Step::Exit, None);
                }
                self.shared.gateway.touch(&self.conversation_id, &self.task_id).await;
                (Step::Continue, Some(schedule.after_progress(delay)))
            }
            Ok(status) if status.state.is_failure() => {
                self.fail(status.error_message.as_deref()).await;
                (Step::Exit, None)
            }
            Ok(status) => match status.state {
                TaskState::Done => (self.settle_done().await, None),
                state => {
                    debug!(task_id = %self.task_id, %state, "unrecognized task state");
                    (Step::Continue, Some(schedule.after_unknown(delay)))
                }
            },
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "status poll failed, backing off");
                (Step::Continue, Some(schedule.after_error(delay)))
            }
        }
    }

    fn owns(&self, conversation: &Conversation) -> bool {
        !self.token.is_cancelled() && conversation.listener.as_ref().is_some_and(|l| l.id() == self.id)
    }

    /// Rebinds a leftover generic placeholder. False once this listener no
    /// longer owns the conversation.
    fn refresh(&self) -> bool {
        self.shared.with_conversation(&self.conversation_id, |conversation| {
            if !self.owns(conversation) {
                return false;
            }
            upgrade_placeholder(&mut conversation.messages, &self.task_id);
            true
        })
    }

    /// Server finished without a push. Clears `sending`, then optionally
    /// looks for the answer in history.
    async fn settle_done(&self) -> Step {
        let mut record = None;
        let conversation_id = self.conversation_id.clone();
        self.shared
            .gateway
            .save_if(&self.conversation_id, || {
                self.shared.with_conversation(&self.conversation_id, |conversation| {
                    if !self.owns(conversation) {
                        return None;
                    }
                    let task = conversation.active.as_mut()?;
                    task.server_done = true;
                    record = Some(task.record.clone());
                    Some(Snapshot::idle(conversation_id, Utc::now()))
                })
            })
            .await;
        let Some(record) = record else {
            return Step::Exit;
        };
        info!(conversation_id = %self.conversation_id, task_id = %self.task_id, "task done on server, no answer pushed yet");

        if self.shared.config.refetch_history_on_done {
            match self.shared.backend.history(&self.conversation_id).await {
                Ok(rows) => {
                    if let Some(row) = latest_answer_since(&rows, record.submitted_at) {
                        self.finish_resolved(Message::from(row)).await;
                        return Step::Exit;
                    }
                    debug!(task_id = %self.task_id, "history has no answer yet");
                }
                Err(e) => {
                    warn!(task_id = %self.task_id, error = %e, "history refetch after done failed");
                }
            }
        }
        Step::StopPolling
    }

    async fn resolve(&self, text: String) {
        let answer = Message::bot(
            MessageId(format!("answer-{}", self.task_id)),
            text,
            Utc::now(),
        );
        self.finish_resolved(answer).await;
    }

    async fn finish_resolved(&self, answer: Message) {
        let conversation_id = self.conversation_id.clone();
        let resolved = self
            .shared
            .gateway
            .save_if(&self.conversation_id, || {
                self.shared.with_conversation(&self.conversation_id, |conversation| {
                    if !self.owns(conversation) {
                        return None;
                    }
                    replace_placeholder(&mut conversation.messages, answer);
                    conversation.finish(TaskPhase::Resolved);
                    Some(Snapshot::idle(conversation_id, Utc::now()))
                })
            })
            .await;
        if resolved {
            info!(conversation_id = %self.conversation_id, task_id = %self.task_id, "task resolved");
        }
    }

    async fn fail(&self, reason: Option<&str>) {
        let owned = self
            .shared
            .with_conversation(&self.conversation_id, |conversation| self.owns(conversation));
        if !owned {
            return;
        }
        warn!(
            conversation_id = %self.conversation_id,
            task_id = %self.task_id,
            reason = reason.unwrap_or("unspecified"),
            "task failed on server"
        );

        let text = self.shared.texts.processing_failed.clone();
        if let Err(e) = self
            .shared
            .backend
            .save_fallback_answer(&self.task_id, &self.conversation_id, &text)
            .await
        {
            warn!(task_id = %self.task_id, error = %e, "saving fallback answer failed");
        }

        let conversation_id = self.conversation_id.clone();
        self.shared
            .gateway
            .save_if(&self.conversation_id, || {
                self.shared.with_conversation(&self.conversation_id, |conversation| {
                    if !self.owns(conversation) {
                        return None;
                    }
                    remove_placeholder(&mut conversation.messages);
                    conversation.messages.push(Message::bot(
                        MessageId(format!("error-{}", uuid::Uuid::new_v4())),
                        text,
                        Utc::now(),
                    ));
                    conversation.finish(TaskPhase::Failed);
                    Some(Snapshot::idle(conversation_id, Utc::now()))
                })
            })
            .await;
    }
}
