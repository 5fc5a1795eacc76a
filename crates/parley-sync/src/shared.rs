// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! State shared by the engine facade, its listeners and its ask calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use parley_config::model::{SyncConfig, TextsConfig};
use parley_core::types::ConversationId;
use parley_core::{PushTransport, QnaBackend};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::backoff::{millis, PollSchedule};
use crate::conversation::Conversation;
use crate::gateway::PersistenceGateway;

pub(crate) struct Shared {
    pub config: SyncConfig,
    pub texts: TextsConfig,
    pub schedule: PollSchedule,
    pub backend: Arc<dyn QnaBackend>,
    pub push: Arc<dyn PushTransport>,
    pub gateway: PersistenceGateway,
    /// Parent of every listener's token.
    pub shutdown: CancellationToken,
    conversations: Mutex<HashMap<ConversationId, Conversation>>,
    next_attempt: AtomicU64,
    next_listener: AtomicU64,
    last_ask: tokio::sync::Mutex<Option<Instant>>,
}

impl Shared {
    pub fn new(
        config: SyncConfig,
        texts: TextsConfig,
        backend: Arc<dyn QnaBackend>,
        push: Arc<dyn PushTransport>,
        gateway: PersistenceGateway,
    ) -> Self {
        Self {
            schedule: PollSchedule::from_config(&config),
            config,
            texts,
            backend,
            push,
            gateway,
            shutdown: CancellationToken::new(),
            conversations: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(1),
            next_listener: AtomicU64::new(1),
            last_ask: tokio::sync::Mutex::new(None),
        }
    }

    /// Runs `f` on the conversation's state, creating it on first use.
    ///
    /// Never hold this across an await.
    pub fn with_conversation<R>(
        &self,
        conversation_id: &ConversationId,
        f: impl FnOnce(&mut Conversation) -> R,
    ) -> R {
        let mut conversations = self
            .conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        f(conversations.entry(conversation_id.clone()).or_default())
    }

    pub fn next_attempt(&self) -> u64 {
        self.next_attempt.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_listener_id(&self) -> u64 {
        self.next_listener.fetch_add(1, Ordering::Relaxed)
    }

    /// Waits until the engine-wide ask cooldown has elapsed, then claims it.
    pub async fn ask_slot(&self) {
        let mut last = self.last_ask.lock().await;
        if let Some(previous) = *last {
            let ready = previous + millis(self.config.ask_cooldown_ms);
            if ready > Instant::now() {
                sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Stops every listener and aborts every in-flight ask.
    pub fn stop_all(&self) {
        self.shutdown.cancel();
        let mut conversations = self
            .conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for conversation in conversations.values_mut() {
            conversation.stop_listener();
            if let Some(ask) = conversation.inflight_ask.take() {
                ask.abort.abort();
            }
        }
    }
}
