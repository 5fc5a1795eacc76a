// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Versioned snapshot schema and its codec.
//!
//! The current schema is version 2, an explicit envelope tagged with
//! `"version": 2`. Values without a version tag are the loose version 1 blob
//! older clients wrote; they are decoded and migrated on read. Anything that
//! cannot be decoded yields the idle snapshot, so a corrupt entry can never
//! wedge a conversation in the sending state.

use chrono::{DateTime, TimeZone, Utc};
use parley_core::types::{ConversationId, MessageId, QnaId, TaskId, TaskRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Schema version written by [`encode`].
pub const SCHEMA_VERSION: u32 = 2;

/// Everything needed to resume or repair a conversation after a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub conversation_id: ConversationId,
    pub sending: bool,
    pub task_record: Option<TaskRecord>,
    pub saved_at: DateTime<Utc>,
    /// Set by a user cancel. Terminal until the snapshot is overwritten.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Nothing in flight.
    pub fn idle(conversation_id: ConversationId, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            sending: false,
            task_record: None,
            saved_at: now,
            cancelled_at: None,
        }
    }

    pub fn sending(conversation_id: ConversationId, record: TaskRecord, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            sending: true,
            task_record: Some(record),
            saved_at: now,
            cancelled_at: None,
        }
    }

    pub fn cancelled(conversation_id: ConversationId, now: DateTime<Utc>) -> Self {
        Self {
            cancelled_at: Some(now),
            ..Self::idle(conversation_id, now)
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        self.task_record.as_ref().and_then(|r| r.task_id.as_ref())
    }

    /// When the pending question was asked, falling back to `saved_at`.
    pub fn pending_timestamp(&self) -> DateTime<Utc> {
        self.task_record
            .as_ref()
            .map_or(self.saved_at, |r| r.submitted_at)
    }

    /// Whether a sending snapshot has outlived `ttl` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.sending && now.signed_duration_since(self.saved_at) > ttl
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotV2 {
    version: u32,
    conversation_id: ConversationId,
    #[serde(default)]
    sending: bool,
    #[serde(default)]
    task_record: Option<TaskRecord>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    saved_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    cancelled_at: Option<DateTime<Utc>>,
}

/// Serializes a snapshot as the current schema.
pub fn encode(snapshot: &Snapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string(&SnapshotV2 {
        version: SCHEMA_VERSION,
        conversation_id: snapshot.conversation_id.clone(),
        sending: snapshot.sending,
        task_record: snapshot.task_record.clone(),
        saved_at: snapshot.saved_at,
        cancelled_at: snapshot.cancelled_at,
    })
}

/// Decodes a stored value, falling back to the idle snapshot on anything
/// unreadable.
pub fn decode(conversation_id: &ConversationId, raw: Option<&str>, now: DateTime<Utc>) -> Snapshot {
    let Some(raw) = raw else {
        return Snapshot::idle(conversation_id.clone(), now);
    };
    match try_decode(conversation_id, raw) {
        Ok(snapshot) => snapshot,
        Err(reason) => {
            warn!(conversation_id = %conversation_id, %reason, "undecodable snapshot, treating as idle");
            Snapshot::idle(conversation_id.clone(), now)
        }
    }
}

fn try_decode(conversation_id: &ConversationId, raw: &str) -> Result<Snapshot, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    if !value.is_object() {
        return Err("snapshot is not a JSON object".to_string());
    }

    match value.get("version").and_then(Value::as_u64) {
        None => {
            let legacy: LegacyV1 = serde_json::from_value(value).map_err(|e| e.to_string())?;
            Ok(legacy.migrate(conversation_id))
        }
        Some(version) => {
            if version > u64::from(SCHEMA_VERSION) {
                warn!(version, "snapshot written by a newer schema, decoding known fields");
            }
            let v2: SnapshotV2 = serde_json::from_value(value).map_err(|e| e.to_string())?;
            Ok(Snapshot {
                conversation_id: v2.conversation_id,
                sending: v2.sending,
                task_record: v2.task_record,
                saved_at: v2.saved_at,
                cancelled_at: v2.cancelled_at,
            })
        }
    }
}

/// The unversioned blob: `sending`, `currentTaskId`, `pendingQnaId`,
/// `pendingUserMsgId`, `pendingUserMsg{id,text,time}`, `pendingUserMsgTs`,
/// `savedAt`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LegacyV1 {
    sending: bool,
    current_task_id: Option<Value>,
    pending_qna_id: Option<Value>,
    pending_user_msg_id: Option<Value>,
    pending_user_msg: Option<LegacyUserMessage>,
    pending_user_msg_ts: Option<Value>,
    saved_at: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyUserMessage {
    id: Option<Value>,
    text: Option<String>,
    time: Option<Value>,
}

impl LegacyV1 {
    fn migrate(self, conversation_id: &ConversationId) -> Snapshot {
        let saved_at = self
            .saved_at
            .as_ref()
            .and_then(legacy_timestamp)
            .unwrap_or_default();

        let message = self.pending_user_msg.unwrap_or_default();
        let submitted_at = message
            .time
            .as_ref()
            .and_then(legacy_timestamp)
            .or_else(|| self.pending_user_msg_ts.as_ref().and_then(legacy_timestamp))
            .unwrap_or(saved_at);
        let user_message_id = message
            .id
            .as_ref()
            .and_then(legacy_string)
            .or_else(|| self.pending_user_msg_id.as_ref().and_then(legacy_string));
        let task_id = self.current_task_id.as_ref().and_then(legacy_string);

        // A record needs at least the question or the task to be useful.
        let task_record = if message.text.is_none() && task_id.is_none() {
            None
        } else {
            Some(TaskRecord {
                task_id: task_id.map(TaskId),
                qna_id: self.pending_qna_id.as_ref().and_then(legacy_string).map(QnaId),
                user_message_id: MessageId(
                    user_message_id.unwrap_or_else(|| submitted_at.timestamp_millis().to_string()),
                ),
                question_text: message.text.unwrap_or_default(),
                submitted_at,
            })
        };

        Snapshot {
            conversation_id: conversation_id.clone(),
            sending: self.sending && task_record.is_some(),
            task_record,
            saved_at,
            cancelled_at: None,
        }
    }
}

/// Ids were written as either JSON strings or numbers.
fn legacy_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Epoch milliseconds or an RFC 3339 string.
fn legacy_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .filter(|ms| *ms > 0)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn conv() -> ConversationId {
        ConversationId::from("c1")
    }

    #[test]
    fn v2_round_trip_preserves_every_field() {
        let snapshot = Snapshot {
            conversation_id: conv(),
            sending: true,
            task_record: Some(TaskRecord {
                task_id: Some(TaskId::from("t1")),
                qna_id: Some(QnaId::from("q1")),
                user_message_id: MessageId::from("u1"),
                question_text: "what is suffering?".into(),
                submitted_at: ts(1_700_000_000_000),
            }),
            saved_at: ts(1_700_000_005_000),
            cancelled_at: None,
        };
        let raw = encode(&snapshot).unwrap();
        assert!(raw.contains("\"version\":2"));
        assert_eq!(decode(&conv(), Some(&raw), ts(0)), snapshot);
    }

    #[test]
    fn missing_value_is_idle() {
        let snapshot = decode(&conv(), None, ts(42));
        assert_eq!(snapshot, Snapshot::idle(conv(), ts(42)));
    }

    #[tracing_test::traced_test]
    #[test]
    fn garbage_decodes_to_idle_with_warning() {
        let snapshot = decode(&conv(), Some("{not json"), ts(7));
        assert!(!snapshot.sending);
        assert!(snapshot.task_record.is_none());
        assert!(logs_contain("undecodable snapshot"));
    }

    #[test]
    fn non_object_decodes_to_idle() {
        assert!(!decode(&conv(), Some("[1,2]"), ts(7)).sending);
        assert!(!decode(&conv(), Some("null"), ts(7)).sending);
    }

    #[test]
    fn legacy_blob_migrates_to_current_schema() {
        let raw = r#"{
            "sending": true,
            "currentTaskId": "t9",
            "pendingQnaId": 77,
            "pendingUserMsgId": "1700000000000",
            "pendingUserMsg": {"id": "1700000000000", "text": "hello", "time": "10:00"},
            "pendingUserMsgTs": 1700000000000,
            "savedAt": 1700000004000
        }"#;
        let snapshot = decode(&conv(), Some(raw), ts(0));
        assert!(snapshot.sending);
        assert_eq!(snapshot.saved_at, ts(1_700_000_004_000));
        let record = snapshot.task_record.unwrap();
        assert_eq!(record.task_id, Some(TaskId::from("t9")));
        assert_eq!(record.qna_id, Some(QnaId::from("77")));
        assert_eq!(record.user_message_id, MessageId::from("1700000000000"));
        assert_eq!(record.question_text, "hello");
        // "10:00" is a display string, so the numeric timestamp wins.
        assert_eq!(record.submitted_at, ts(1_700_000_000_000));
    }

    #[test]
    fn legacy_cleared_blob_is_not_sending() {
        let snapshot = decode(&conv(), Some(r#"{"sending": false, "savedAt": 5}"#), ts(0));
        assert!(!snapshot.sending);
        assert!(snapshot.task_record.is_none());
        assert_eq!(snapshot.saved_at, ts(5));
    }

    #[test]
    fn legacy_sending_without_question_or_task_is_dropped() {
        let snapshot = decode(&conv(), Some(r#"{"sending": true, "savedAt": 5}"#), ts(0));
        assert!(!snapshot.sending);
    }

    #[test]
    fn newer_schema_keeps_known_fields() {
        let raw = r#"{"version": 3, "conversationId": "c1", "sending": false,
                      "savedAt": 10, "cancelledAt": 11, "priority": "high"}"#;
        let snapshot = decode(&conv(), Some(raw), ts(0));
        assert_eq!(snapshot.cancelled_at, Some(ts(11)));
    }

    #[test]
    fn staleness_uses_strict_ttl() {
        let ttl = chrono::Duration::seconds(30);
        let record = TaskRecord {
            task_id: None,
            qna_id: None,
            user_message_id: MessageId::from("u"),
            question_text: "q".into(),
            submitted_at: ts(0),
        };
        let snapshot = Snapshot::sending(conv(), record, ts(0));
        assert!(!snapshot.is_stale(ts(30_000), ttl));
        assert!(snapshot.is_stale(ts(31_000), ttl));
        assert!(!Snapshot::idle(conv(), ts(0)).is_stale(ts(99_000), ttl));
    }
}
