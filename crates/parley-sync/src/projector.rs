// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pure projection of history plus pending state into the displayed list,
//! and the placeholder bookkeeping applied to that list in place.

use chrono::{DateTime, Utc};
use parley_core::types::{Author, HistoryRow, Message, MessageId, Placeholder, TaskId};

/// The locally known, not yet answered question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingView {
    pub user_message_id: MessageId,
    pub question_text: String,
    pub submitted_at: DateTime<Utc>,
    pub placeholder: Placeholder,
    pub label: String,
}

impl PendingView {
    fn is_recorded_in(&self, rows: &[HistoryRow]) -> bool {
        let question = self.question_text.trim();
        rows.iter().any(|row| {
            row.id == self.user_message_id
                || (row.author == Author::User
                    && row.text.trim() == question
                    && row.created_at >= self.submitted_at)
        })
    }
}

/// Builds the ordered message list for `rows` and an optional pending task.
///
/// History is ordered by `created_at`, keeping server order for ties. The
/// optimistic user message is added unless the server already recorded it,
/// and the placeholder, when present, is always last.
pub fn project(rows: &[HistoryRow], pending: Option<&PendingView>) -> Vec<Message> {
    let mut messages: Vec<Message> = rows.iter().map(Message::from).collect();
    messages.sort_by_key(|m| m.created_at);

    if let Some(pending) = pending {
        if !pending.is_recorded_in(rows) {
            let at = messages.partition_point(|m| m.created_at <= pending.submitted_at);
            messages.insert(
                at,
                Message::user(
                    pending.user_message_id.clone(),
                    pending.question_text.clone(),
                    pending.submitted_at,
                ),
            );
        }
        messages.push(Message::pending(
            pending.placeholder.clone(),
            pending.label.clone(),
            pending.submitted_at,
        ));
    }
    messages
}

/// Whether history holds a bot answer created at or after `since`.
pub fn has_answer_since(rows: &[HistoryRow], since: DateTime<Utc>) -> bool {
    latest_answer_since(rows, since).is_some()
}

pub fn latest_answer_since(rows: &[HistoryRow], since: DateTime<Utc>) -> Option<&HistoryRow> {
    rows.iter()
        .filter(|row| row.author == Author::Bot && row.created_at >= since)
        .max_by_key(|row| row.created_at)
}

/// Installs `placeholder` as the single pending message.
///
/// A generic placeholder already in the list is upgraded in place, keeping its
/// position and timestamp. Any other pending message is replaced.
pub fn ensure_placeholder(
    messages: &mut Vec<Message>,
    placeholder: Placeholder,
    label: &str,
    at: DateTime<Utc>,
) {
    let Some(slot) = messages.iter().position(Message::is_pending) else {
        messages.push(Message::pending(placeholder, label, at));
        return;
    };

    let current = &mut messages[slot];
    match &current.placeholder {
        Some(existing) if *existing == placeholder => {}
        Some(Placeholder::Generic) if placeholder.task_id().is_some() => {
            current.id = placeholder.message_id();
            current.placeholder = Some(placeholder);
        }
        _ => *current = Message::pending(placeholder, label, at),
    }

    let mut index = 0;
    messages.retain(|m| {
        let keep = index == slot || !m.is_pending();
        index += 1;
        keep
    });
}

/// Rebinds a generic placeholder to `task_id`. Returns false when there was
/// no generic placeholder to upgrade.
pub fn upgrade_placeholder(messages: &mut [Message], task_id: &TaskId) -> bool {
    match messages
        .iter_mut()
        .find(|m| m.placeholder == Some(Placeholder::Generic))
    {
        Some(message) => {
            let upgraded = Placeholder::ForTask(task_id.clone());
            message.id = upgraded.message_id();
            message.placeholder = Some(upgraded);
            true
        }
        None => false,
    }
}

/// Drops every pending message. Returns how many were removed.
pub fn remove_placeholder(messages: &mut Vec<Message>) -> usize {
    let before = messages.len();
    messages.retain(|m| !m.is_pending());
    before - messages.len()
}

/// Puts `answer` where the placeholder was, or at the end if there was none.
pub fn replace_placeholder(messages: &mut Vec<Message>, answer: Message) {
    match messages.iter().position(Message::is_pending) {
        Some(index) => {
            messages[index] = answer;
            messages.retain(|m| !m.is_pending());
        }
        None => messages.push(answer),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn row(id: &str, author: Author, text: &str, at: i64) -> HistoryRow {
        HistoryRow {
            id: MessageId::from(id),
            author,
            text: text.to_string(),
            created_at: ts(at),
        }
    }

    fn pending(task: Option<&str>) -> PendingView {
        PendingView {
            user_message_id: MessageId::from("local-1"),
            question_text: "  what is dukkha? ".to_string(),
            submitted_at: ts(100),
            placeholder: Placeholder::for_task(task.map(TaskId::from).as_ref()),
            label: "Processing...".to_string(),
        }
    }

    #[test]
    fn history_is_sorted_stably() {
        let rows = vec![
            row("b", Author::Bot, "second", 20),
            row("a", Author::User, "first", 10),
            row("c", Author::User, "tie", 20),
        ];
        let ids: Vec<_> = project(&rows, None).into_iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn pending_adds_user_message_and_trailing_placeholder() {
        let rows = vec![row("a", Author::Bot, "old", 10), row("z", Author::Bot, "late", 200)];
        let messages = project(&rows, Some(&pending(Some("t1"))));
        let ids: Vec<_> = messages.iter().map(|m| m.id.0.as_str()).collect();
        assert_eq!(ids, vec!["a", "local-1", "z", "pending-t1"]);
        assert_eq!(messages.iter().filter(|m| m.is_pending()).count(), 1);
    }

    #[test]
    fn recorded_question_is_not_duplicated() {
        let rows = vec![row("srv-9", Author::User, "what is dukkha?", 101)];
        let messages = project(&rows, Some(&pending(None)));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, MessageId::from("srv-9"));
        assert_eq!(messages[1].id, MessageId::from("pending-generic"));
    }

    #[test]
    fn earlier_identical_question_does_not_hide_new_one() {
        let rows = vec![row("srv-1", Author::User, "what is dukkha?", 50)];
        let messages = project(&rows, Some(&pending(None)));
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn answer_detection_is_inclusive() {
        let rows = vec![row("a", Author::Bot, "x", 100), row("u", Author::User, "y", 300)];
        assert!(has_answer_since(&rows, ts(100)));
        assert!(!has_answer_since(&rows, ts(101)));
    }

    #[test]
    fn generic_placeholder_upgrades_exactly_once() {
        let mut messages = vec![Message::pending(Placeholder::Generic, "…", ts(1))];
        assert!(upgrade_placeholder(&mut messages, &TaskId::from("t1")));
        assert_eq!(messages[0].id, MessageId::from("pending-t1"));
        assert!(!upgrade_placeholder(&mut messages, &TaskId::from("t2")));
        assert_eq!(
            messages[0].placeholder,
            Some(Placeholder::ForTask(TaskId::from("t1")))
        );
    }

    #[test]
    fn ensure_keeps_a_single_placeholder() {
        let mut messages = Vec::new();
        ensure_placeholder(&mut messages, Placeholder::Generic, "…", ts(1));
        ensure_placeholder(&mut messages, Placeholder::Generic, "…", ts(2));
        assert_eq!(messages.len(), 1);

        let t1 = Placeholder::ForTask(TaskId::from("t1"));
        ensure_placeholder(&mut messages, t1.clone(), "…", ts(3));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].placeholder, Some(t1));
        // Upgrade keeps the original timestamp.
        assert_eq!(messages[0].created_at, ts(1));

        let t2 = Placeholder::ForTask(TaskId::from("t2"));
        ensure_placeholder(&mut messages, t2.clone(), "…", ts(4));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].placeholder, Some(t2));
    }

    #[test]
    fn replace_puts_answer_in_placeholder_slot() {
        let mut messages = vec![
            Message::user(MessageId::from("u"), "q", ts(1)),
            Message::pending(Placeholder::ForTask(TaskId::from("t1")), "…", ts(1)),
        ];
        replace_placeholder(&mut messages, Message::bot(MessageId::from("ans"), "a", ts(2)));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text, "a");
        assert!(!messages.iter().any(Message::is_pending));
    }
}
