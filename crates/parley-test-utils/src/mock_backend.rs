// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted question/answer backend for deterministic testing.
//!
//! `MockBackend` implements `QnaBackend` with queued responses and records
//! every call together with the tokio instant it was made at, so tests
//! running under paused time can assert exact poll cadences.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;

use parley_core::traits::adapter::PluginAdapter;
use parley_core::traits::backend::QnaBackend;
use parley_core::types::{
    AdapterType, AskReceipt, Author, ConversationId, HealthStatus, HistoryRow, MessageId, QnaId,
    TaskId, TaskState, TaskStatus,
};
use parley_core::ParleyError;

/// One call made against the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Ask {
        conversation_id: ConversationId,
        question: String,
    },
    Status {
        task_id: TaskId,
    },
    Cancel {
        task_id: TaskId,
        qna_id: Option<QnaId>,
        conversation_id: ConversationId,
    },
    SaveFallback {
        task_id: TaskId,
        conversation_id: ConversationId,
        text: String,
    },
    History {
        conversation_id: ConversationId,
    },
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub call: BackendCall,
}

#[derive(Default)]
struct State {
    asks: VecDeque<Result<AskReceipt, ParleyError>>,
    issued: u64,
    statuses: HashMap<TaskId, VecDeque<Result<TaskStatus, ParleyError>>>,
    settled: HashMap<TaskId, TaskStatus>,
    histories: HashMap<ConversationId, Vec<HistoryRow>>,
    history_fails: bool,
    cancel_fails: bool,
    status_latency: Duration,
    calls: Vec<RecordedCall>,
}

/// A backend whose answers are scripted by the test.
///
/// Unscripted asks succeed with task ids `t1`, `t2`, ... and qna ids `q1`,
/// `q2`, .... Unscripted status calls report the task's settled state,
/// which is `running` until [`set_status`](Self::set_status) changes it.
pub struct MockBackend {
    state: Mutex<State>,
    ask_gate: watch::Sender<bool>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            ask_gate: watch::Sender::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: BackendCall) {
        self.lock().calls.push(RecordedCall {
            at: Instant::now(),
            call,
        });
    }

    /// Queues the result of the next ask.
    pub fn script_ask(&self, result: Result<AskReceipt, ParleyError>) {
        self.lock().asks.push_back(result);
    }

    /// Blocks asks after they are recorded until [`release_asks`](Self::release_asks).
    pub fn hold_asks(&self) {
        self.ask_gate.send_replace(false);
    }

    pub fn release_asks(&self) {
        self.ask_gate.send_replace(true);
    }

    /// Queues one status result for `task_id`, consumed before the settled state.
    pub fn script_status(&self, task_id: &str, result: Result<TaskStatus, ParleyError>) {
        self.lock()
            .statuses
            .entry(TaskId::from(task_id))
            .or_default()
            .push_back(result);
    }

    /// Sets the state reported once the scripted queue for `task_id` is empty.
    pub fn set_status(&self, task_id: &str, state: TaskState) {
        self.lock()
            .settled
            .insert(TaskId::from(task_id), TaskStatus::new(state));
    }

    /// Makes every status call take `latency` before it answers.
    pub fn set_status_latency(&self, latency: Duration) {
        self.lock().status_latency = latency;
    }

    pub fn set_history(&self, conversation_id: &str, rows: Vec<HistoryRow>) {
        self.lock()
            .histories
            .insert(ConversationId::from(conversation_id), rows);
    }

    pub fn push_history(&self, conversation_id: &str, row: HistoryRow) {
        self.lock()
            .histories
            .entry(ConversationId::from(conversation_id))
            .or_default()
            .push(row);
    }

    pub fn fail_history(&self, fail: bool) {
        self.lock().history_fails = fail;
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.lock().cancel_fails = fail;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn asked_questions(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match &c.call {
                BackendCall::Ask { question, .. } => Some(question.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn ask_count(&self) -> usize {
        self.asked_questions().len()
    }

    /// When each status call for `task_id` was made.
    pub fn status_times(&self, task_id: &str) -> Vec<Instant> {
        let wanted = TaskId::from(task_id);
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(&c.call, BackendCall::Status { task_id } if *task_id == wanted))
            .map(|c| c.at)
            .collect()
    }

    pub fn cancelled_tasks(&self) -> Vec<TaskId> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match &c.call {
                BackendCall::Cancel { task_id, .. } => Some(task_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fallback_answers(&self) -> Vec<(TaskId, String)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match &c.call {
                BackendCall::SaveFallback { task_id, text, .. } => {
                    Some((task_id.clone(), text.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// A user row of server history.
pub fn user_row(id: &str, text: &str, created_at: DateTime<Utc>) -> HistoryRow {
    HistoryRow {
        id: MessageId::from(id),
        author: Author::User,
        text: text.to_string(),
        created_at,
    }
}

/// A bot row of server history.
pub fn bot_row(id: &str, text: &str, created_at: DateTime<Utc>) -> HistoryRow {
    HistoryRow {
        id: MessageId::from(id),
        author: Author::Bot,
        text: text.to_string(),
        created_at,
    }
}

#[async_trait]
impl PluginAdapter for MockBackend {
    fn name(&self) -> &str {
        "mock-backend"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Backend
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        Ok(())
    }
}

#[async_trait]
impl QnaBackend for MockBackend {
    async fn ask(
        &self,
        conversation_id: &ConversationId,
        question: &str,
    ) -> Result<AskReceipt, ParleyError> {
        self.record(BackendCall::Ask {
            conversation_id: conversation_id.clone(),
            question: question.to_string(),
        });

        let mut gate = self.ask_gate.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = gate.wait_for(|open| *open).await;

        let mut state = self.lock();
        if let Some(scripted) = state.asks.pop_front() {
            return scripted;
        }
        state.issued += 1;
        let n = state.issued;
        Ok(AskReceipt {
            task_id: Some(TaskId(format!("t{n}"))),
            qna_id: Some(QnaId(format!("q{n}"))),
        })
    }

    async fn status(&self, task_id: &TaskId) -> Result<TaskStatus, ParleyError> {
        self.record(BackendCall::Status {
            task_id: task_id.clone(),
        });
        let latency = self.lock().status_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        if let Some(scripted) = state.statuses.get_mut(task_id).and_then(VecDeque::pop_front) {
            return scripted;
        }
        Ok(state
            .settled
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| TaskStatus::new(TaskState::Running)))
    }

    async fn cancel(
        &self,
        task_id: &TaskId,
        qna_id: Option<&QnaId>,
        conversation_id: &ConversationId,
    ) -> Result<(), ParleyError> {
        self.record(BackendCall::Cancel {
            task_id: task_id.clone(),
            qna_id: qna_id.cloned(),
            conversation_id: conversation_id.clone(),
        });
        if self.lock().cancel_fails {
            return Err(ParleyError::transport("cancel refused", false, Some(500)));
        }
        Ok(())
    }

    async fn save_fallback_answer(
        &self,
        task_id: &TaskId,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<(), ParleyError> {
        self.record(BackendCall::SaveFallback {
            task_id: task_id.clone(),
            conversation_id: conversation_id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn history(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<HistoryRow>, ParleyError> {
        self.record(BackendCall::History {
            conversation_id: conversation_id.clone(),
        });
        let state = self.lock();
        if state.history_fails {
            return Err(ParleyError::transport("history unavailable", true, Some(503)));
        }
        Ok(state
            .histories
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn unscripted_asks_get_sequential_ids() {
        let backend = MockBackend::new();
        let conv = ConversationId::from("c");
        let first = backend.ask(&conv, "a").await.unwrap();
        let second = backend.ask(&conv, "b").await.unwrap();
        assert_eq!(first.task_id, Some(TaskId::from("t1")));
        assert_eq!(second.qna_id, Some(QnaId::from("q2")));
        assert_eq!(backend.asked_questions(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn scripted_statuses_run_before_settled_state() {
        let backend = MockBackend::new();
        let task = TaskId::from("t1");
        backend.script_status("t1", Ok(TaskStatus::new(TaskState::Queued)));
        backend.set_status("t1", TaskState::Done);

        assert_eq!(backend.status(&task).await.unwrap().state, TaskState::Queued);
        assert_eq!(backend.status(&task).await.unwrap().state, TaskState::Done);
        assert_eq!(backend.status(&task).await.unwrap().state, TaskState::Done);
        assert_eq!(
            backend.status(&TaskId::from("other")).await.unwrap().state,
            TaskState::Running
        );
        assert_eq!(backend.status_times("t1").len(), 3);
    }

    #[tokio::test]
    async fn held_asks_wait_for_release() {
        let backend = Arc::new(MockBackend::new());
        backend.hold_asks();
        let call = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.ask(&ConversationId::from("c"), "q").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(backend.ask_count(), 1);
        assert!(!call.is_finished());

        backend.release_asks();
        let receipt = call.await.unwrap().unwrap();
        assert_eq!(receipt.task_id, Some(TaskId::from("t1")));
    }

    #[tokio::test(start_paused = true)]
    async fn status_latency_delays_the_answer() {
        let backend = MockBackend::new();
        backend.set_status_latency(Duration::from_secs(60));
        let started = Instant::now();
        backend.status(&TaskId::from("t1")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(backend.status_times("t1"), vec![started]);
    }

    #[tokio::test]
    async fn history_failure_is_retryable_transport_error() {
        let backend = MockBackend::new();
        backend.fail_history(true);
        let err = backend.history(&ConversationId::from("c")).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
