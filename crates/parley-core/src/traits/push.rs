// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Push transport trait and the subscription handle it returns.

use std::fmt;

use tokio::sync::mpsc;

use crate::traits::adapter::PluginAdapter;
use crate::types::{PushPayload, TaskId};

/// A real-time channel that may deliver a task's answer without polling.
///
/// Delivery is best-effort: a payload may never arrive, which is why the
/// engine always runs a polling loop alongside every subscription.
pub trait PushTransport: PluginAdapter {
    /// Registers interest in `task_id`. Dropping (or explicitly
    /// unsubscribing) the returned handle removes exactly this registration.
    fn subscribe(&self, task_id: &TaskId) -> PushSubscription;
}

/// Removes one registration when consumed or dropped.
pub struct UnsubscribeToken {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl UnsubscribeToken {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A token that releases nothing.
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Releases the registration now. Later calls (and the drop) do nothing.
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for UnsubscribeToken {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for UnsubscribeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsubscribeToken")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Receiving end of one push registration.
#[derive(Debug)]
pub struct PushSubscription {
    receiver: mpsc::UnboundedReceiver<PushPayload>,
    token: UnsubscribeToken,
}

impl PushSubscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<PushPayload>, token: UnsubscribeToken) -> Self {
        Self { receiver, token }
    }

    /// Waits for the next payload. Returns `None` once the transport side is gone.
    pub async fn recv(&mut self) -> Option<PushPayload> {
        self.receiver.recv().await
    }

    /// Detaches this registration. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.token.unsubscribe();
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn token_releases_once_even_when_dropped_after_unsubscribe() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut token = UnsubscribeToken::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        token.unsubscribe();
        token.unsubscribe();
        drop(token);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn token_releases_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        drop(UnsubscribeToken::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscription_yields_sent_payloads() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = PushSubscription::new(rx, UnsubscribeToken::noop());
        tx.send(PushPayload {
            task_id: Some(TaskId::from("t1")),
            conversation_id: None,
            text: "hello".into(),
        })
        .unwrap();
        let got = sub.recv().await.unwrap();
        assert_eq!(got.text, "hello");

        sub.unsubscribe();
        assert!(tx.is_closed());
    }
}
