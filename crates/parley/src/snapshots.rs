// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parley snapshot` and `parley sweep` command implementations.

use std::fmt;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use parley_config::model::SyncConfig;
use parley_core::types::ConversationId;
use parley_core::ParleyError;
use parley_sync::snapshot::{self, Snapshot};
use parley_sync::PersistenceGateway;
use tracing::info;

/// What a sweep did to one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Sending and older than the TTL; reset to idle.
    Swept,
    /// Sending but still within the TTL.
    Fresh,
    /// Nothing in flight.
    Idle,
}

impl fmt::Display for SweepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Swept => f.write_str("swept"),
            Self::Fresh => f.write_str("pending (within ttl)"),
            Self::Idle => f.write_str("idle"),
        }
    }
}

pub fn ttl(config: &SyncConfig) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(config.staleness_ttl_secs).unwrap_or(i64::MAX))
}

/// Applies the staleness policy to one conversation without starting an
/// engine: a sending snapshot older than `ttl` is reset to idle.
pub async fn sweep(
    gateway: &PersistenceGateway,
    conversation_id: &ConversationId,
    ttl: chrono::Duration,
    now: DateTime<Utc>,
) -> SweepOutcome {
    let snapshot = gateway.load(conversation_id).await;
    if !snapshot.sending {
        return SweepOutcome::Idle;
    }
    if !snapshot.is_stale(now, ttl) {
        return SweepOutcome::Fresh;
    }
    info!(conversation_id = %conversation_id, saved_at = %snapshot.saved_at, "sweeping stale snapshot");
    gateway.clear(conversation_id).await;
    SweepOutcome::Swept
}

pub fn to_json(snapshot: &Snapshot) -> Result<String, ParleyError> {
    snapshot::encode(snapshot).map_err(|e| ParleyError::Codec { source: e.into() })
}

/// Human-readable summary of a snapshot.
pub fn describe(snapshot: &Snapshot, now: DateTime<Utc>) -> String {
    let state = if snapshot.cancelled_at.is_some() {
        "cancelled"
    } else if snapshot.sending {
        "sending"
    } else {
        "idle"
    };
    let age = now.signed_duration_since(snapshot.saved_at).num_seconds();

    let mut out = String::new();
    let _ = writeln!(out, "conversation: {}", snapshot.conversation_id);
    let _ = writeln!(out, "state:        {state}");
    let _ = writeln!(out, "saved:        {} ({age}s ago)", snapshot.saved_at.to_rfc3339());
    if let Some(at) = snapshot.cancelled_at {
        let _ = writeln!(out, "cancelled:    {}", at.to_rfc3339());
    }
    if let Some(record) = &snapshot.task_record {
        let task = record
            .task_id
            .as_ref()
            .map_or_else(|| "(not assigned)".to_string(), ToString::to_string);
        let _ = writeln!(out, "task:         {task}");
        if let Some(qna) = &record.qna_id {
            let _ = writeln!(out, "qna:          {qna}");
        }
        let _ = writeln!(out, "question:     {:?}", record.question_text);
        let _ = writeln!(out, "submitted:    {}", record.submitted_at.to_rfc3339());
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::types::{MessageId, TaskId, TaskRecord};
    use parley_storage::MemoryStore;

    use super::*;

    fn gateway() -> PersistenceGateway {
        PersistenceGateway::new(Arc::new(MemoryStore::new()), "chat_state_v1:")
    }

    fn sending(conversation: &str, task: Option<&str>, saved_at: DateTime<Utc>) -> Snapshot {
        Snapshot::sending(
            ConversationId::from(conversation),
            TaskRecord {
                task_id: task.map(TaskId::from),
                qna_id: None,
                user_message_id: MessageId::from("u1"),
                question_text: "why?".to_string(),
                submitted_at: saved_at,
            },
            saved_at,
        )
    }

    #[tokio::test]
    async fn sweep_clears_only_stale_sending_snapshots() {
        let gateway = gateway();
        let now = Utc::now();
        let ttl = ttl(&SyncConfig::default());

        gateway
            .save(sending("old", Some("t1"), now - chrono::Duration::seconds(31)))
            .await;
        gateway
            .save(sending("new", Some("t2"), now - chrono::Duration::seconds(5)))
            .await;

        let old = ConversationId::from("old");
        let new = ConversationId::from("new");
        assert_eq!(sweep(&gateway, &old, ttl, now).await, SweepOutcome::Swept);
        assert_eq!(sweep(&gateway, &new, ttl, now).await, SweepOutcome::Fresh);
        assert_eq!(
            sweep(&gateway, &ConversationId::from("none"), ttl, now).await,
            SweepOutcome::Idle
        );

        assert!(!gateway.load(&old).await.sending);
        assert!(gateway.load(&new).await.sending);
        assert_eq!(sweep(&gateway, &old, ttl, now).await, SweepOutcome::Idle);
    }

    #[test]
    fn describe_shows_unassigned_task() {
        let now = Utc::now();
        let text = describe(&sending("c1", None, now), now);
        assert!(text.contains("state:        sending"));
        assert!(text.contains("(not assigned)"));
        assert!(text.contains("\"why?\""));
    }

    #[test]
    fn describe_marks_cancelled_snapshots() {
        let now = Utc::now();
        let text = describe(&Snapshot::cancelled(ConversationId::from("c1"), now), now);
        assert!(text.contains("state:        cancelled"));
        assert!(!text.contains("task:"));
    }

    #[test]
    fn json_output_is_the_stored_schema() {
        let json = to_json(&Snapshot::idle(ConversationId::from("c1"), Utc::now())).unwrap();
        assert!(json.contains(r#""version":2"#));
        assert!(json.contains(r#""conversationId":"c1""#));
    }
}
