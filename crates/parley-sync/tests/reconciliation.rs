// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for reconciling persisted snapshots with history on
//! load, refocus and restart.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_core::types::{
    Author, ConversationId, HistoryRow, Message, MessageId, Placeholder, TaskId, TaskRecord,
};
use parley_core::KeyValueStore;
use parley_sync::{project, Snapshot, TaskPhase};
use parley_test_utils::{bot_row, user_row, TestHarness};
use tokio::time::sleep;

fn conv() -> ConversationId {
    ConversationId::from("c1")
}

fn record(task_id: Option<&str>, question: &str, submitted_at: DateTime<Utc>) -> TaskRecord {
    TaskRecord {
        task_id: task_id.map(TaskId::from),
        qna_id: None,
        user_message_id: MessageId::from("local-u1"),
        question_text: question.to_string(),
        submitted_at,
    }
}

fn sending(task_id: Option<&str>, question: &str, submitted_ago: i64, saved_ago: i64) -> Snapshot {
    Snapshot::sending(
        conv(),
        record(task_id, question, TestHarness::seconds_ago(submitted_ago)),
        TestHarness::seconds_ago(saved_ago),
    )
}

fn older_history() -> Vec<HistoryRow> {
    vec![
        user_row("h1", "earlier question", TestHarness::seconds_ago(600)),
        bot_row("h2", "earlier answer", TestHarness::seconds_ago(590)),
    ]
}

fn pending(messages: &[Message]) -> Vec<&Message> {
    messages.iter().filter(|m| m.is_pending()).collect()
}

// ---- Test 1: Nothing pending ----

#[tokio::test(start_paused = true)]
async fn test_idle_snapshot_returns_history_as_is() {
    let harness = TestHarness::new();
    let rows = older_history();

    let messages = harness.engine.reconcile(&conv(), rows.clone()).await;

    assert_eq!(messages, project(&rows, None));
    assert_eq!(harness.engine.messages(&conv()), messages);
    assert_eq!(harness.store.write_count(), 0);
    assert_eq!(harness.backend.ask_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_snapshot_drops_pending_state() {
    let harness = TestHarness::new();
    harness
        .seed_snapshot(&Snapshot::cancelled(conv(), Utc::now()))
        .await;

    let messages = harness.engine.reconcile(&conv(), older_history()).await;

    assert!(pending(&messages).is_empty());
    assert_eq!(messages.len(), 2);
    assert!(
        harness
            .engine
            .snapshot(&conv())
            .await
            .cancelled_at
            .is_some()
    );
    assert!(!harness.engine.is_listening(&conv()));
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_snapshot_is_treated_as_idle() {
    let harness = TestHarness::new();
    harness.seed_raw(&conv(), "{not json").await;

    let messages = harness.engine.reconcile(&conv(), older_history()).await;

    assert_eq!(messages, project(&older_history(), None));
    assert_eq!(harness.backend.ask_count(), 0);
}

// ---- Test 2: Resume with a known task id ----

#[tokio::test(start_paused = true)]
async fn test_resume_reattaches_placeholder_and_listener() {
    let harness = TestHarness::new();
    harness
        .seed_snapshot(&sending(Some("t7"), "why?", 5, 2))
        .await;
    let mut rows = older_history();
    rows.push(user_row("h3", "why?", TestHarness::seconds_ago(4)));

    let messages = harness.engine.reconcile(&conv(), rows).await;

    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].id, MessageId::from("h3"));
    assert_eq!(
        messages[3].placeholder,
        Some(Placeholder::ForTask(TaskId::from("t7")))
    );
    assert!(harness.engine.is_listening(&conv()));
    assert_eq!(harness.engine.status(&conv()).phase, TaskPhase::AwaitingResult);
    assert_eq!(harness.backend.ask_count(), 0);

    harness.push_answer("t7", "because");
    harness.settle().await;
    let messages = harness.engine.messages(&conv());
    assert!(pending(&messages).is_empty());
    assert_eq!(messages.last().unwrap().text, "because");
    assert!(!harness.engine.snapshot(&conv()).await.sending);
}

#[tokio::test(start_paused = true)]
async fn test_resume_keeps_local_question_missing_from_history() {
    let harness = TestHarness::new();
    harness
        .seed_snapshot(&sending(Some("t7"), "why?", 5, 2))
        .await;

    let messages = harness.engine.reconcile(&conv(), older_history()).await;

    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].id, MessageId::from("local-u1"));
    assert_eq!(messages[2].author, Author::User);
    assert!(messages[3].is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_twice_is_idempotent() {
    let harness = TestHarness::new();
    harness
        .seed_snapshot(&sending(Some("t7"), "why?", 5, 2))
        .await;

    let first = harness.engine.reconcile(&conv(), older_history()).await;
    let second = harness.engine.reconcile(&conv(), older_history()).await;

    assert_eq!(first, second);
    assert_eq!(pending(&second).len(), 1);
    assert_eq!(harness.bus.subscriber_count(&TaskId::from("t7")), 1);
    assert_eq!(harness.backend.ask_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_restart_continues_polling() {
    let mut harness = TestHarness::new();
    harness.engine.submit(&conv(), "question").await.unwrap();

    harness.restart();
    harness.settle().await;
    assert_eq!(harness.bus.subscriber_count(&TaskId::from("t1")), 0);

    let rows = vec![user_row("h1", "question", Utc::now())];
    let messages = harness.engine.reconcile(&conv(), rows).await;

    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[1].placeholder,
        Some(Placeholder::ForTask(TaskId::from("t1")))
    );
    assert_eq!(harness.bus.subscriber_count(&TaskId::from("t1")), 1);
    assert_eq!(harness.backend.ask_count(), 1);

    sleep(Duration::from_millis(1300)).await;
    assert_eq!(harness.backend.status_times("t1").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_repairs_snapshot_lost_while_listening() {
    let harness = TestHarness::new();
    harness.engine.submit(&conv(), "question").await.unwrap();

    // A write that never landed.
    harness
        .seed_snapshot(&Snapshot::idle(conv(), Utc::now()))
        .await;

    let messages = harness.engine.reconcile(&conv(), Vec::new()).await;

    assert_eq!(pending(&messages).len(), 1);
    let snapshot = harness.engine.snapshot(&conv()).await;
    assert!(snapshot.sending);
    assert_eq!(snapshot.task_id(), Some(&TaskId::from("t1")));
    assert_eq!(harness.bus.subscriber_count(&TaskId::from("t1")), 1);
}

// ---- Test 3: Answer arrived while away ----

#[tokio::test(start_paused = true)]
async fn test_answer_in_history_clears_without_listening() {
    let harness = TestHarness::new();
    harness
        .seed_snapshot(&sending(Some("t1"), "why?", 20, 5))
        .await;
    let mut rows = older_history();
    rows.push(user_row("h3", "why?", TestHarness::seconds_ago(19)));
    rows.push(bot_row("h4", "because", TestHarness::seconds_ago(10)));

    let messages = harness.engine.reconcile(&conv(), rows.clone()).await;

    assert_eq!(messages, project(&rows, None));
    assert!(!harness.engine.snapshot(&conv()).await.sending);
    assert!(!harness.engine.is_listening(&conv()));
    assert_eq!(harness.bus.subscriber_count(&TaskId::from("t1")), 0);

    sleep(Duration::from_secs(5)).await;
    assert!(harness.backend.status_times("t1").is_empty());
}

// ---- Test 4: Staleness ----

#[tokio::test(start_paused = true)]
async fn test_stale_snapshot_is_swept_without_reissue() {
    let harness = TestHarness::new();
    harness
        .seed_snapshot(&sending(None, "why?", 40, 31))
        .await;

    let messages = harness.engine.reconcile(&conv(), older_history()).await;

    assert_eq!(messages, project(&older_history(), None));
    assert!(!harness.engine.snapshot(&conv()).await.sending);
    harness.settle().await;
    assert_eq!(harness.backend.ask_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_snapshot_with_task_id_does_not_resume() {
    let harness = TestHarness::new();
    harness
        .seed_snapshot(&sending(Some("t5"), "why?", 40, 31))
        .await;

    harness.engine.reconcile(&conv(), Vec::new()).await;

    assert!(!harness.engine.is_listening(&conv()));
    sleep(Duration::from_secs(5)).await;
    assert!(harness.backend.status_times("t5").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_within_ttl_resumes() {
    let harness = TestHarness::new();
    harness
        .seed_snapshot(&sending(Some("t5"), "why?", 40, 29))
        .await;

    harness.engine.reconcile(&conv(), Vec::new()).await;

    assert!(harness.engine.is_listening(&conv()));
}

#[tokio::test(start_paused = true)]
async fn test_stale_snapshot_sweeps_hung_submission() {
    let harness = TestHarness::builder()
        .with_config(|c| c.ask_timeout_ms = 3_600_000)
        .build();
    harness.backend.hold_asks();
    let engine = harness.engine.clone();
    let submit = tokio::spawn(async move { engine.submit(&conv(), "why?").await });
    harness.settle().await;
    assert_eq!(harness.engine.status(&conv()).phase, TaskPhase::Submitting);

    // The submission stopped refreshing its snapshot two minutes ago.
    let mut snapshot = harness.engine.snapshot(&conv()).await;
    snapshot.saved_at = TestHarness::seconds_ago(120);
    harness.seed_snapshot(&snapshot).await;

    let messages = harness.engine.reconcile(&conv(), older_history()).await;

    assert_eq!(messages, project(&older_history(), None));
    assert!(pending(&messages).is_empty());
    let status = harness.engine.status(&conv());
    assert_eq!(status.phase, TaskPhase::Idle);
    assert!(!status.sending);
    assert!(!harness.engine.snapshot(&conv()).await.sending);

    assert_eq!(submit.await.unwrap().unwrap(), parley_sync::SubmitOutcome::Superseded);
    assert_eq!(harness.backend.ask_count(), 1);
}

// ---- Test 5: Reissue ----

#[tokio::test(start_paused = true)]
async fn test_question_without_task_id_is_reissued() {
    let harness = TestHarness::new();
    harness
        .seed_snapshot(&sending(None, "why?", 3, 3))
        .await;

    let messages = harness.engine.reconcile(&conv(), older_history()).await;

    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].text, "why?");
    assert_eq!(messages[3].placeholder, Some(Placeholder::Generic));

    harness.settle().await;
    assert_eq!(harness.backend.asked_questions(), vec!["why?"]);
    let status = harness.engine.status(&conv());
    assert_eq!(status.task_id, Some(TaskId::from("t1")));
    assert!(harness.engine.is_listening(&conv()));
    let messages = harness.engine.messages(&conv());
    assert_eq!(
        pending(&messages)[0].placeholder,
        Some(Placeholder::ForTask(TaskId::from("t1")))
    );
    assert_eq!(
        harness.engine.snapshot(&conv()).await.task_id(),
        Some(&TaskId::from("t1"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_reissue_happens_once_across_repeated_reconciles() {
    let harness = TestHarness::new();
    harness.backend.hold_asks();
    harness
        .seed_snapshot(&sending(None, "why?", 3, 3))
        .await;

    let first = harness.engine.reconcile(&conv(), older_history()).await;
    harness.settle().await;
    let second = harness.engine.reconcile(&conv(), older_history()).await;

    assert_eq!(first, second);
    assert_eq!(harness.backend.ask_count(), 1);

    harness.backend.release_asks();
    harness.settle().await;
    assert_eq!(harness.backend.ask_count(), 1);
    assert!(harness.engine.is_listening(&conv()));
}

#[tokio::test(start_paused = true)]
async fn test_question_already_in_history_is_not_reissued() {
    let harness = TestHarness::new();
    harness
        .seed_snapshot(&sending(None, "why?", 3, 3))
        .await;
    let mut rows = older_history();
    rows.push(user_row("h3", " why? ", TestHarness::seconds_ago(2)));

    let messages = harness.engine.reconcile(&conv(), rows.clone()).await;

    assert_eq!(messages, project(&rows, None));
    assert!(!harness.engine.snapshot(&conv()).await.sending);
    harness.settle().await;
    assert_eq!(harness.backend.ask_count(), 0);
}

// ---- Test 6: Legacy snapshots ----

#[tokio::test(start_paused = true)]
async fn test_legacy_snapshot_resumes_and_is_rewritten() {
    let harness = TestHarness::new();
    let asked = TestHarness::seconds_ago(4).timestamp_millis();
    let saved = TestHarness::seconds_ago(1).timestamp_millis();
    let raw = format!(
        r#"{{"sending":true,"currentTaskId":77,"pendingQnaId":"q9","pendingUserMsg":{{"id":"u-legacy","text":"hello","time":{asked}}},"savedAt":{saved}}}"#
    );
    harness.seed_raw(&conv(), &raw).await;

    let messages = harness.engine.reconcile(&conv(), Vec::new()).await;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id, MessageId::from("u-legacy"));
    assert_eq!(messages[0].text, "hello");
    assert_eq!(
        messages[1].placeholder,
        Some(Placeholder::ForTask(TaskId::from("77")))
    );
    assert!(harness.engine.is_listening(&conv()));

    let stored = harness
        .store
        .get_item(&format!("chat_state_v1:{}", conv()))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.contains(r#""version":2"#));
}

// ---- Test 7: Loading through the backend ----

#[tokio::test(start_paused = true)]
async fn test_load_fetches_history_then_reconciles() {
    let harness = TestHarness::new();
    harness.backend.set_history("c1", older_history());

    let messages = harness.engine.load(&conv()).await;

    assert_eq!(messages, project(&older_history(), None));
}

#[tokio::test(start_paused = true)]
async fn test_load_keeps_current_messages_when_history_fails() {
    let harness = TestHarness::new();
    harness.engine.submit(&conv(), "question").await.unwrap();
    let before = harness.engine.messages(&conv());
    harness.backend.fail_history(true);

    let messages = harness.engine.load(&conv()).await;

    assert_eq!(messages, before);
    assert!(harness.engine.is_listening(&conv()));
}

// ---- Test 8: Storage failures ----

#[tokio::test(start_paused = true)]
async fn test_failing_store_does_not_block_resolution() {
    let harness = TestHarness::new();
    harness.store.set_fail_writes(true);

    harness.engine.submit(&conv(), "question").await.unwrap();
    harness.push_answer("t1", "answer");
    harness.settle().await;

    let messages = harness.engine.messages(&conv());
    assert!(pending(&messages).is_empty());
    assert_eq!(messages.last().unwrap().text, "answer");
    assert_eq!(harness.store.write_count(), 0);
}
