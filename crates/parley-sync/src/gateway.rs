// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reads and writes per-conversation snapshots in the key-value store.
//!
//! Writes never fail from the caller's point of view: store errors are
//! logged and the in-memory state carries on. Reconciliation repairs any
//! divergence on the next load. Writes for one conversation are serialized
//! so a decision and the write it implies cannot be reordered with another
//! flow's write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use parley_core::types::{ConversationId, TaskId};
use parley_core::KeyValueStore;
use tracing::{debug, warn};

use crate::snapshot::{self, Snapshot};

pub struct PersistenceGateway {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
    write_locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
    /// Latest `saved_at` written while sending, per conversation.
    high_water: Mutex<HashMap<ConversationId, DateTime<Utc>>>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            write_locks: Mutex::new(HashMap::new()),
            high_water: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(&self, conversation_id: &ConversationId) -> String {
        format!("{}{}", self.namespace, conversation_id)
    }

    /// Current snapshot, or the idle one when missing, unreadable or the
    /// store is failing.
    pub async fn load(&self, conversation_id: &ConversationId) -> Snapshot {
        let raw = match self.store.get_item(&self.key(conversation_id)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "snapshot read failed");
                None
            }
        };
        snapshot::decode(conversation_id, raw.as_deref(), Utc::now())
    }

    pub async fn save(&self, snapshot: Snapshot) {
        let conversation_id = snapshot.conversation_id.clone();
        self.save_if(&conversation_id, move || Some(snapshot)).await;
    }

    /// Writes whatever `decide` returns, evaluated while holding the
    /// conversation's write lock. Returns whether a write was attempted.
    pub async fn save_if<F>(&self, conversation_id: &ConversationId, decide: F) -> bool
    where
        F: FnOnce() -> Option<Snapshot>,
    {
        let lock = self.write_lock(conversation_id);
        let _guard = lock.lock().await;
        match decide() {
            Some(snapshot) => {
                self.write(snapshot).await;
                true
            }
            None => false,
        }
    }

    /// Marks the conversation as having nothing in flight.
    pub async fn clear(&self, conversation_id: &ConversationId) {
        self.save(Snapshot::idle(conversation_id.clone(), Utc::now()))
            .await;
    }

    /// Heartbeat: refreshes `saved_at` if the stored snapshot is still
    /// sending for `task_id`. Returns whether it was refreshed.
    pub async fn touch(&self, conversation_id: &ConversationId, task_id: &TaskId) -> bool {
        let lock = self.write_lock(conversation_id);
        let _guard = lock.lock().await;
        let mut current = self.load(conversation_id).await;
        if !current.sending || current.task_id() != Some(task_id) {
            debug!(conversation_id = %conversation_id, task_id = %task_id, "heartbeat skipped, snapshot moved on");
            return false;
        }
        current.saved_at = Utc::now();
        self.write(current).await;
        true
    }

    async fn write(&self, mut snapshot: Snapshot) {
        {
            let mut high_water = lock(&self.high_water);
            if snapshot.sending {
                let floor = high_water
                    .get(&snapshot.conversation_id)
                    .copied()
                    .unwrap_or(snapshot.saved_at);
                snapshot.saved_at = snapshot.saved_at.max(floor);
                high_water.insert(snapshot.conversation_id.clone(), snapshot.saved_at);
            } else {
                high_water.remove(&snapshot.conversation_id);
            }
        }

        let key = self.key(&snapshot.conversation_id);
        let encoded = match snapshot::encode(&snapshot) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(conversation_id = %snapshot.conversation_id, error = %e, "snapshot encode failed");
                return;
            }
        };
        match self.store.set_item(&key, &encoded).await {
            Ok(()) => debug!(
                conversation_id = %snapshot.conversation_id,
                sending = snapshot.sending,
                task_id = ?snapshot.task_id(),
                "snapshot saved"
            ),
            Err(e) => warn!(
                conversation_id = %snapshot.conversation_id,
                error = %e,
                "snapshot write failed"
            ),
        }
    }

    fn write_lock(&self, conversation_id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.write_locks)
            .entry(conversation_id.clone())
            .or_default()
            .clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use parley_core::types::{MessageId, TaskRecord};
    use parley_storage::MemoryStore;

    use super::*;

    fn record(task: Option<&str>) -> TaskRecord {
        TaskRecord {
            task_id: task.map(TaskId::from),
            qna_id: None,
            user_message_id: MessageId::from("u1"),
            question_text: "q".into(),
            submitted_at: Utc::now(),
        }
    }

    fn gateway() -> (Arc<MemoryStore>, PersistenceGateway) {
        let store = Arc::new(MemoryStore::new());
        let gateway = PersistenceGateway::new(store.clone(), "chat_state_v1:");
        (store, gateway)
    }

    #[tokio::test]
    async fn snapshots_are_namespaced_per_conversation() {
        let (store, gateway) = gateway();
        let conv = ConversationId::from("42");
        gateway
            .save(Snapshot::sending(conv.clone(), record(Some("t1")), Utc::now()))
            .await;
        assert!(store.get_item("chat_state_v1:42").await.unwrap().is_some());
        assert_eq!(gateway.load(&conv).await.task_id(), Some(&TaskId::from("t1")));
        assert!(!gateway.load(&ConversationId::from("43")).await.sending);
    }

    #[tokio::test]
    async fn saved_at_never_decreases_while_sending() {
        let (_store, gateway) = gateway();
        let conv = ConversationId::from("c");
        let later = Utc.timestamp_millis_opt(2_000_000).unwrap();
        let earlier = Utc.timestamp_millis_opt(1_000_000).unwrap();
        gateway
            .save(Snapshot::sending(conv.clone(), record(Some("t1")), later))
            .await;
        gateway
            .save(Snapshot::sending(conv.clone(), record(Some("t1")), earlier))
            .await;
        assert_eq!(gateway.load(&conv).await.saved_at, later);

        gateway.clear(&conv).await;
        gateway
            .save(Snapshot::sending(conv.clone(), record(Some("t2")), earlier))
            .await;
        assert_eq!(gateway.load(&conv).await.saved_at, earlier);
    }

    #[tokio::test]
    async fn touch_only_refreshes_the_matching_sending_task() {
        let (_store, gateway) = gateway();
        let conv = ConversationId::from("c");
        let old = Utc::now() - chrono::Duration::seconds(20);
        gateway
            .save(Snapshot::sending(conv.clone(), record(Some("t1")), old))
            .await;

        assert!(!gateway.touch(&conv, &TaskId::from("other")).await);
        assert!(gateway.touch(&conv, &TaskId::from("t1")).await);
        assert!(gateway.load(&conv).await.saved_at > old);

        gateway.save(Snapshot::cancelled(conv.clone(), Utc::now())).await;
        assert!(!gateway.touch(&conv, &TaskId::from("t1")).await);
        assert!(gateway.load(&conv).await.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn conditional_write_can_decline() {
        let (store, gateway) = gateway();
        let conv = ConversationId::from("c");
        assert!(!gateway.save_if(&conv, || None).await);
        assert_eq!(store.write_count(), 0);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let (store, gateway) = gateway();
        let conv = ConversationId::from("c");
        store.set_fail_writes(true);
        gateway
            .save(Snapshot::sending(conv.clone(), record(None), Utc::now()))
            .await;
        assert!(!gateway.load(&conv).await.sending);
        assert!(logs_contain("snapshot write failed"));
    }
}
