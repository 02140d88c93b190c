//! Pending table tests

use std::sync::Arc;

use serde_json::json;

use super::*;

fn reply_to(id: &str, body: serde_json::Value) -> Message {
    Message::from_parts(
        crate::message::MessageHeader::new(format!("reply-{}", id), "q", 0, id),
        body,
    )
}

#[tokio::test]
async fn test_resolve_delivers_once_and_removes_entry() {
    let table = PendingRequestTable::default();
    let reply = table.register("r1").unwrap();
    assert!(table.contains("r1"));

    assert!(table.resolve("r1", reply_to("r1", json!("ok"))));
    assert!(!table.contains("r1"));
    assert!(table.is_empty());

    // Second resolution finds nothing
    assert!(!table.resolve("r1", reply_to("r1", json!("again"))));
    assert!(!table.reject("r1", ConnectionError::Expired("r1".into())));

    let msg = reply.await.unwrap();
    assert_eq!(msg.body, json!("ok"));
}

#[tokio::test]
async fn test_reject_wins_over_late_resolve() {
    let table = PendingRequestTable::default();
    let reply = table.register("r1").unwrap();

    assert!(table.reject("r1", ConnectionError::Expired("r1".into())));
    assert!(!table.resolve("r1", reply_to("r1", json!("late"))));

    match reply.await {
        Err(ConnectionError::Expired(id)) => assert_eq!(id, "r1"),
        other => panic!("expected Expired, got {:?}", other),
    }
}

#[test]
fn test_duplicate_id_rejected() {
    let table = PendingRequestTable::default();
    let _reply = table.register("dup").unwrap();
    match table.register("dup") {
        Err(ConnectionError::DuplicateId(id)) => assert_eq!(id, "dup"),
        other => panic!("expected DuplicateId, got {:?}", other),
    }
    assert_eq!(table.len(), 1);
}

#[test]
fn test_max_pending() {
    let table = PendingRequestTable::new(2);
    let _a = table.register("a").unwrap();
    let _b = table.register("b").unwrap();
    assert!(matches!(
        table.register("c"),
        Err(ConnectionError::TooManyPending(2))
    ));
    table.take("a");
    assert!(table.register("c").is_ok());
}

#[tokio::test]
async fn test_dropped_slot_is_abandoned() {
    let table = PendingRequestTable::default();
    let reply = table.register("gone").unwrap();
    drop(table.take("gone"));
    assert!(matches!(reply.await, Err(ConnectionError::Abandoned)));
}

#[test]
fn test_slot_sees_dropped_waiter() {
    let (slot, reply) = ReplySlot::new();
    assert!(!slot.is_abandoned());
    drop(reply);
    assert!(slot.is_abandoned());
    // Resolving an abandoned slot is harmless
    slot.resolve(reply_to("x", json!(null)));
}

#[tokio::test]
async fn test_reject_all() {
    let table = PendingRequestTable::default();
    let a = table.register("a").unwrap();
    let b = table.register("b").unwrap();

    assert_eq!(table.reject_all(|| ConnectionError::Closed), 2);
    assert!(table.is_empty());
    assert!(matches!(a.await, Err(ConnectionError::Closed)));
    assert!(matches!(b.await, Err(ConnectionError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_resolvers_resolve_exactly_once() {
    for round in 0..50 {
        let table = Arc::new(PendingRequestTable::default());
        let id = format!("race-{}", round);
        let reply = table.register(&id).unwrap();

        let mut handles = Vec::new();
        for n in 0..8 {
            let table = table.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                if n % 2 == 0 {
                    table.resolve(&id, reply_to(&id, json!(n)))
                } else {
                    table.reject(&id, ConnectionError::Expired(id.clone()))
                }
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(!table.contains(&id));
        assert!(!matches!(reply.await, Err(ConnectionError::Abandoned)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_respects_limit() {
    for round in 0..20 {
        let table = Arc::new(PendingRequestTable::new(4));
        let barrier = Arc::new(tokio::sync::Barrier::new(32));

        let mut handles = Vec::new();
        for n in 0..32 {
            let table = table.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                table.register(&format!("r{}-{}", round, n))
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(reply) => admitted.push(reply),
                Err(e) => assert!(matches!(e, ConnectionError::TooManyPending(4))),
            }
        }
        assert_eq!(admitted.len(), 4);
        assert_eq!(table.len(), 4);
    }
}

#[test]
fn test_rejected_registrations_release_capacity() {
    let table = PendingRequestTable::new(2);
    let _a = table.register("a").unwrap();
    assert!(matches!(table.register("a"), Err(ConnectionError::DuplicateId(_))));
    let _b = table.register("b").unwrap();
    assert!(matches!(table.register("c"), Err(ConnectionError::TooManyPending(2))));

    assert_eq!(table.reject_all(|| ConnectionError::Closed), 2);
    let _c = table.register("c").unwrap();
    let _d = table.register("d").unwrap();
    assert!(matches!(table.register("e"), Err(ConnectionError::TooManyPending(2))));
}

#[tokio::test]
async fn test_distinct_ids_do_not_cross_resolve() {
    let table = PendingRequestTable::default();
    let first = table.register("first").unwrap();
    let second = table.register("second").unwrap();

    // Replies arrive out of order
    table.resolve("second", reply_to("second", json!(2)));
    table.resolve("first", reply_to("first", json!(1)));

    assert_eq!(first.await.unwrap().header.correlation_id, "first");
    assert_eq!(second.await.unwrap().header.correlation_id, "second");
}

#[test]
fn test_reply_pending_until_resolved() {
    let table = PendingRequestTable::default();
    let mut reply = tokio_test::task::spawn(table.register("wait").unwrap());
    tokio_test::assert_pending!(reply.poll());

    assert!(table.resolve("wait", reply_to("wait", json!("done"))));
    assert!(reply.is_woken());
    let msg = tokio_test::assert_ready_ok!(reply.poll());
    assert_eq!(msg.body, json!("done"));
}
