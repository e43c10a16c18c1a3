//! Store integration: persistence scenarios, counters, cascade, search,
//! and writer contention.

mod common;

use common::temp_store;
use promptdeck::store::{ExportFormat, Role, Store};
use promptdeck::PromptdeckError;
use std::time::Duration;

#[test]
fn single_message_persistence_scenario() {
    let (store, _dir) = temp_store();

    let session_id = store.create_session("m", None, None).unwrap();
    store
        .add_message(&session_id, Role::User, "hello", None, None, None)
        .unwrap();
    store
        .add_message(&session_id, Role::User, "world", None, None, None)
        .unwrap();

    let messages = store.get_messages(&session_id).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].seq, 1);
    assert_eq!(messages[1].seq, 2);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[1].content, "world");
    assert!(messages.iter().all(|m| m.role == Role::User));

    let session = store.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.message_count, 2);
}

#[test]
fn counters_track_many_writes() {
    let (store, _dir) = temp_store();
    let session_id = store.create_session("m", None, Some("t")).unwrap();

    let mut expected_tokens = 0usize;
    for n in 1..=20usize {
        store
            .add_message(
                &session_id,
                if n % 2 == 0 { Role::Assistant } else { Role::User },
                &format!("message {}", n),
                Some(n),
                Some(10),
                None,
            )
            .unwrap();
        expected_tokens += n;
    }

    let session = store.get_session(&session_id).unwrap().unwrap();
    let messages = store.get_messages(&session_id).unwrap();
    assert_eq!(session.message_count, 20);
    assert_eq!(messages.len(), 20);
    assert_eq!(session.total_tokens, expected_tokens);
    assert_eq!(session.total_duration_ms, 200);
    assert_eq!(
        messages.iter().map(|m| m.seq).collect::<Vec<_>>(),
        (1..=20).collect::<Vec<_>>()
    );
}

#[test]
fn cascade_delete_leaves_nothing_behind() {
    let (store, _dir) = temp_store();
    let keep = store.create_session("m", None, Some("keeper")).unwrap();
    store
        .add_message(&keep, Role::User, "survivor content", None, None, None)
        .unwrap();

    let doomed = store.create_session("m", None, Some("doomed title")).unwrap();
    store
        .add_message(&doomed, Role::User, "unique haystack needle", None, None, None)
        .unwrap();
    store.add_tag(&doomed, "scratch").unwrap();

    store.delete_session(&doomed).unwrap();

    assert!(store.get_session(&doomed).unwrap().is_none());
    assert!(store.get_messages(&doomed).unwrap().is_empty());
    assert!(store.get_sessions_by_tag("scratch").unwrap().is_empty());
    assert!(store.search("needle").unwrap().is_empty());
    assert!(store.search("doomed").unwrap().is_empty());

    // The other session is untouched
    assert!(store.get_session(&keep).unwrap().is_some());
    assert_eq!(store.search("survivor").unwrap().len(), 1);
}

#[test]
fn search_soundness_tokens_and_phrases() {
    let (store, _dir) = temp_store();

    let rust_session = store
        .create_session("m", None, Some("Rust ownership notes"))
        .unwrap();
    store
        .add_message(
            &rust_session,
            Role::Assistant,
            "Ownership moves values; borrows alias them.",
            None,
            None,
            None,
        )
        .unwrap();

    let cooking = store.create_session("m", None, Some("Bread recipes")).unwrap();
    store
        .add_message(&cooking, Role::User, "How long should dough rest?", None, None, None)
        .unwrap();

    // Token overlap: any term may match
    let hits = store.search("ownership dough").unwrap();
    assert_eq!(hits.len(), 2);

    // Case folding
    assert_eq!(store.search("OWNERSHIP").unwrap().len(), 1);

    // Phrases must match exactly
    assert_eq!(store.search("\"borrows alias them\"").unwrap().len(), 1);
    assert!(store.search("\"alias borrows them\"").unwrap().is_empty());

    // Every result actually matches
    for session in store.search("bread").unwrap() {
        assert!(session.title.to_lowercase().contains("bread"));
    }
}

#[test]
fn export_round_trips_message_order() {
    let (store, _dir) = temp_store();
    let session_id = store.create_session("m", None, Some("Exported")).unwrap();
    for n in 1..=3 {
        store
            .add_message(&session_id, Role::User, &format!("turn {}", n), None, None, None)
            .unwrap();
    }

    let json_bytes = store.export_session(&session_id, ExportFormat::Json).unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&json_bytes).unwrap();
    let contents: Vec<&str> = doc["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["turn 1", "turn 2", "turn 3"]);

    let md_bytes = store
        .export_session(&session_id, ExportFormat::Markdown)
        .unwrap();
    let markdown = String::from_utf8(md_bytes).unwrap();
    let first = markdown.find("turn 1").unwrap();
    let second = markdown.find("turn 2").unwrap();
    let third = markdown.find("turn 3").unwrap();
    assert!(first < second && second < third);
}

#[test]
fn second_writer_gets_store_busy() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("store.db");

    // Short contention deadline so the test is quick
    let store = Store::open(&db_path, Duration::from_millis(200)).unwrap();
    let session_id = store.create_session("m", None, Some("t")).unwrap();

    // A second writer holds the write lock past the deadline
    let blocker = rusqlite::Connection::open(&db_path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let result = store.add_message(&session_id, Role::User, "blocked", None, None, None);
    let err = result.unwrap_err();
    let kind = err.downcast_ref::<PromptdeckError>().unwrap();
    assert!(matches!(kind, PromptdeckError::StoreBusy(_)), "{}", err);

    // Once the writer commits, the same write succeeds
    blocker.execute_batch("COMMIT;").unwrap();
    store
        .add_message(&session_id, Role::User, "unblocked", None, None, None)
        .unwrap();
    assert_eq!(store.get_messages(&session_id).unwrap().len(), 1);
}

#[test]
fn reopen_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("store.db");

    let session_id = {
        let store = Store::open(&db_path, Duration::from_secs(30)).unwrap();
        let id = store.create_session("m", None, Some("persistent")).unwrap();
        store
            .add_message(&id, Role::User, "before reopen", None, None, None)
            .unwrap();
        id
    };

    let store = Store::open(&db_path, Duration::from_secs(30)).unwrap();
    let session = store.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.title, "persistent");
    assert_eq!(session.message_count, 1);
    assert_eq!(store.search("reopen").unwrap().len(), 1);
}
