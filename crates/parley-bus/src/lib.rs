// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Push channel multiplexer for the Parley pending-task engine.
//!
//! [`TaskBus`] fans a single upstream subscription per task id out to any
//! number of local registrations. Each registration owns its own
//! [`UnsubscribeToken`](parley_core::UnsubscribeToken); the upstream is told to
//! attach on the first registration for a task and to detach on the last.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use parley_core::types::{AdapterType, HealthStatus, PushPayload, TaskId};
use parley_core::{ParleyError, PluginAdapter, PushSubscription, PushTransport, UnsubscribeToken};
use tokio::sync::mpsc;
use tracing::debug;

/// The real transport behind the bus, told when a task gains or loses its
/// last local listener.
///
/// Both hooks run while the bus holds its routing lock, so they must not call
/// back into the bus.
pub trait UpstreamLink: Send + Sync + 'static {
    fn attach(&self, task_id: &TaskId);
    fn detach(&self, task_id: &TaskId);
}

type Routes = HashMap<TaskId, HashMap<u64, mpsc::UnboundedSender<PushPayload>>>;

struct BusInner {
    routes: Mutex<Routes>,
    next_registration: AtomicU64,
    upstream: Option<Arc<dyn UpstreamLink>>,
}

impl BusInner {
    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, task_id: &TaskId, registration: u64) {
        let mut routes = self.routes();
        let Some(listeners) = routes.get_mut(task_id) else {
            return;
        };
        if listeners.remove(&registration).is_none() {
            return;
        }
        if listeners.is_empty() {
            routes.remove(task_id);
            debug!(task_id = %task_id, "last listener left, detaching upstream");
            if let Some(upstream) = &self.upstream {
                upstream.detach(task_id);
            }
        }
    }
}

/// In-process push transport keyed by task id.
///
/// Cloning is cheap and every clone routes through the same table.
#[derive(Clone)]
pub struct TaskBus {
    inner: Arc<BusInner>,
}

impl Default for TaskBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBus {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A bus that reports first-attach and last-detach to `upstream`.
    pub fn with_upstream(upstream: Arc<dyn UpstreamLink>) -> Self {
        Self::build(Some(upstream))
    }

    fn build(upstream: Option<Arc<dyn UpstreamLink>>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                routes: Mutex::new(HashMap::new()),
                next_registration: AtomicU64::new(0),
                upstream,
            }),
        }
    }

    /// Routes a payload to every listener of its task id.
    ///
    /// Payloads without a task id cannot be routed and are dropped. Returns
    /// the number of listeners that received the payload.
    pub fn publish(&self, payload: PushPayload) -> usize {
        match payload.task_id.clone() {
            Some(task_id) => self.publish_to(&task_id, payload),
            None => {
                debug!("dropping push payload without task id");
                0
            }
        }
    }

    /// Routes a payload to the listeners of `task_id` regardless of the
    /// payload's own task id field.
    pub fn publish_to(&self, task_id: &TaskId, payload: PushPayload) -> usize {
        let senders: Vec<_> = match self.inner.routes().get(task_id) {
            Some(listeners) => listeners.values().cloned().collect(),
            None => Vec::new(),
        };
        let delivered = senders
            .iter()
            .filter(|tx| tx.send(payload.clone()).is_ok())
            .count();
        debug!(task_id = %task_id, delivered, "published push payload");
        delivered
    }

    /// Task ids with at least one listener, for bulk re-subscribe after an
    /// upstream reconnect.
    pub fn active_tasks(&self) -> Vec<TaskId> {
        let mut tasks: Vec<_> = self.inner.routes().keys().cloned().collect();
        tasks.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        tasks
    }

    pub fn subscriber_count(&self, task_id: &TaskId) -> usize {
        self.inner.routes().get(task_id).map_or(0, HashMap::len)
    }
}

impl PushTransport for TaskBus {
    fn subscribe(&self, task_id: &TaskId) -> PushSubscription {
        let registration = self.inner.next_registration.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut routes = self.inner.routes();
            let listeners = routes.entry(task_id.clone()).or_default();
            let first = listeners.is_empty();
            listeners.insert(registration, tx);
            if first {
                debug!(task_id = %task_id, "first listener, attaching upstream");
                if let Some(upstream) = &self.inner.upstream {
                    upstream.attach(task_id);
                }
            }
        }

        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        let task_id = task_id.clone();
        let token = UnsubscribeToken::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.release(&task_id, registration);
            }
        });
        PushSubscription::new(rx, token)
    }
}

#[async_trait]
impl PluginAdapter for TaskBus {
    fn name(&self) -> &str {
        "task-bus"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Push
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }

    /// Drops every registration. Listeners see their channel close.
    async fn shutdown(&self) -> Result<(), ParleyError> {
        let drained: Vec<TaskId> = self.inner.routes().drain().map(|(id, _)| id).collect();
        if let Some(upstream) = &self.inner.upstream {
            for task_id in &drained {
                upstream.detach(task_id);
            }
        }
        Ok(())
    }
}
