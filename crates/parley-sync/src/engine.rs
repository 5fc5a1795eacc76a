// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Public facade over the submitter, listeners, cancellation and
//! reconciliation.

use std::sync::Arc;

use parley_config::model::{SyncConfig, TextsConfig};
use parley_core::types::{ConversationId, HistoryRow, Message, TaskId};
use parley_core::{KeyValueStore, ParleyError, PushTransport, QnaBackend};
use tracing::{info, warn};

use crate::backoff::millis;
use crate::cancel::{self, CancelOutcome};
use crate::gateway::PersistenceGateway;
use crate::phase::TaskPhase;
use crate::reconcile;
use crate::shared::Shared;
use crate::snapshot::Snapshot;
use crate::submitter::{self, SubmitOutcome};

/// What the UI needs to render a conversation's controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationStatus {
    pub phase: TaskPhase,
    pub task_id: Option<TaskId>,
    /// A question is in flight and blocks new submissions.
    pub sending: bool,
    /// The cancel control may be shown.
    pub can_cancel: bool,
}

/// Pending-task engine for any number of conversations.
///
/// Cloning shares the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    shared: Arc<Shared>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        texts: TextsConfig,
        backend: Arc<dyn QnaBackend>,
        push: Arc<dyn PushTransport>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let gateway = PersistenceGateway::new(store, config.storage_namespace.clone());
        Self {
            shared: Arc::new(Shared::new(config, texts, backend, push, gateway)),
        }
    }

    /// Asks `question` in the conversation and waits for the ask call.
    ///
    /// Errors only for an empty or overlong question, or while another task
    /// is active. Everything that goes wrong afterwards shows up as a bot
    /// message in the conversation.
    pub async fn submit(
        &self,
        conversation_id: &ConversationId,
        question: &str,
    ) -> Result<SubmitOutcome, ParleyError> {
        submitter::submit(&self.shared, conversation_id, question).await
    }

    pub async fn cancel(&self, conversation_id: &ConversationId) -> CancelOutcome {
        cancel::cancel(&self.shared, conversation_id).await
    }

    /// Rebuilds the conversation from `history` and the persisted snapshot,
    /// resuming, reissuing or clearing the pending task as needed.
    pub async fn reconcile(
        &self,
        conversation_id: &ConversationId,
        history: Vec<HistoryRow>,
    ) -> Vec<Message> {
        reconcile::reconcile(&self.shared, conversation_id, history).await
    }

    /// Fetches history from the backend, then reconciles against it. When
    /// history cannot be fetched the current list is returned unchanged.
    pub async fn load(&self, conversation_id: &ConversationId) -> Vec<Message> {
        match self.shared.backend.history(conversation_id).await {
            Ok(rows) => self.reconcile(conversation_id, rows).await,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "history fetch failed, keeping current messages");
                self.messages(conversation_id)
            }
        }
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.shared
            .with_conversation(conversation_id, |conversation| conversation.messages.clone())
    }

    pub fn status(&self, conversation_id: &ConversationId) -> ConversationStatus {
        let reveal = millis(self.shared.config.cancel_reveal_delay_ms);
        self.shared.with_conversation(conversation_id, |conversation| {
            let active = conversation.active.as_ref();
            let sending = active.is_some_and(|t| t.blocks_submit());
            ConversationStatus {
                phase: conversation.phase(),
                task_id: active.and_then(|t| t.record.task_id.clone()),
                sending,
                can_cancel: sending && active.is_some_and(|t| t.started.elapsed() >= reveal),
            }
        })
    }

    /// The persisted snapshot as currently stored.
    pub async fn snapshot(&self, conversation_id: &ConversationId) -> Snapshot {
        self.shared.gateway.load(conversation_id).await
    }

    /// Whether a listener is running for the conversation.
    pub fn is_listening(&self, conversation_id: &ConversationId) -> bool {
        self.shared.with_conversation(conversation_id, |conversation| {
            conversation.listener.as_ref().is_some_and(|l| l.is_live())
        })
    }

    /// Stops every listener and aborts in-flight asks. Snapshots are left as
    /// they are so the next start can resume.
    pub fn shutdown(&self) {
        info!("sync engine shutting down");
        self.shared.stop_all();
    }
}
