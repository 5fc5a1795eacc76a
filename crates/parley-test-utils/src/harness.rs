// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end engine testing.
//!
//! `TestHarness` assembles a [`SyncEngine`] over a [`MockBackend`], a
//! [`TaskBus`] push transport and a [`MemoryStore`]. The backend, bus and
//! store outlive the engine, so [`TestHarness::restart`] can model an app
//! restart against the same persisted state.

use std::sync::Arc;

use chrono::Utc;
use parley_bus::TaskBus;
use parley_config::model::{SyncConfig, TextsConfig};
use parley_core::types::{ConversationId, PushPayload, TaskId};
use parley_core::KeyValueStore;
use parley_storage::MemoryStore;
use parley_sync::snapshot::{self, Snapshot};
use parley_sync::SyncEngine;

use crate::mock_backend::MockBackend;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: SyncConfig,
    texts: TextsConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            config: SyncConfig::default(),
            texts: TextsConfig::default(),
        }
    }

    /// Adjust the sync configuration.
    pub fn with_config(mut self, adjust: impl FnOnce(&mut SyncConfig)) -> Self {
        adjust(&mut self.config);
        self
    }

    /// Adjust the user-facing texts.
    pub fn with_texts(mut self, adjust: impl FnOnce(&mut TextsConfig)) -> Self {
        adjust(&mut self.texts);
        self
    }

    pub fn build(self) -> TestHarness {
        let backend = Arc::new(MockBackend::new());
        let bus = TaskBus::new();
        let store = Arc::new(MemoryStore::new());
        let engine = new_engine(&self.config, &self.texts, &backend, &bus, &store);
        TestHarness {
            engine,
            backend,
            bus,
            store,
            config: self.config,
            texts: self.texts,
        }
    }
}

fn new_engine(
    config: &SyncConfig,
    texts: &TextsConfig,
    backend: &Arc<MockBackend>,
    bus: &TaskBus,
    store: &Arc<MemoryStore>,
) -> SyncEngine {
    SyncEngine::new(
        config.clone(),
        texts.clone(),
        backend.clone(),
        Arc::new(bus.clone()),
        store.clone(),
    )
}

/// A complete engine environment with mock collaborators.
pub struct TestHarness {
    pub engine: SyncEngine,
    pub backend: Arc<MockBackend>,
    /// Push transport. Publish on it to deliver answers.
    pub bus: TaskBus,
    pub store: Arc<MemoryStore>,
    pub config: SyncConfig,
    pub texts: TextsConfig,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Shuts the engine down and starts a fresh one over the same backend,
    /// push bus and store.
    pub fn restart(&mut self) {
        self.engine.shutdown();
        self.engine = new_engine(
            &self.config,
            &self.texts,
            &self.backend,
            &self.bus,
            &self.store,
        );
    }

    /// Writes `snapshot` straight into the store, bypassing the engine.
    pub async fn seed_snapshot(&self, snapshot: &Snapshot) {
        let raw = snapshot::encode(snapshot).unwrap_or_default();
        self.seed_raw(&snapshot.conversation_id, &raw).await;
    }

    /// Writes a raw stored value for `conversation_id`.
    pub async fn seed_raw(&self, conversation_id: &ConversationId, raw: &str) {
        let key = format!("{}{}", self.config.storage_namespace, conversation_id);
        // MemoryStore only fails writes when told to.
        let _ = self.store.set_item(&key, raw).await;
    }

    /// Delivers an answer for `task_id` on the push bus. Returns how many
    /// subscribers received it.
    pub fn push_answer(&self, task_id: &str, text: &str) -> usize {
        self.bus.publish(PushPayload {
            task_id: Some(TaskId::from(task_id)),
            conversation_id: None,
            text: text.to_string(),
        })
    }

    /// Lets every ready task run to its next wait point. Under paused time
    /// this moves the clock forward by one millisecond.
    pub async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }

    /// Advances paused time by `ms` and lets spawned tasks run.
    pub async fn advance_ms(&self, ms: u64) {
        tokio::time::advance(std::time::Duration::from_millis(ms)).await;
        self.settle().await;
    }

    /// Wall-clock `secs` seconds ago, for seeding aged snapshots.
    pub fn seconds_ago(secs: i64) -> chrono::DateTime<Utc> {
        Utc::now() - chrono::Duration::seconds(secs)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
