//! Message module tests

use super::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

#[test]
fn test_new_message_has_unique_id() {
    let a = Message::new("orders", json!(1));
    let b = Message::new("orders", json!(1));
    assert_ne!(a.id(), b.id());
    assert_eq!(a.header.expiration, 0);
    assert!(a.header.correlation_id.is_empty());
    assert!(!a.header.is_reply());
}

#[test]
fn test_wire_format_field_names() {
    let msg = Message::from_parts(
        MessageHeader::new("r1", "orders", 0, ""),
        json!({"item": "book"}),
    );
    let value: Value = serde_json::from_str(&msg.to_json()).unwrap();
    assert_eq!(
        value,
        json!({
            "header": {"id": "r1", "channel": "orders", "expiration": 0, "correlationID": ""},
            "body": {"item": "book"}
        })
    );
}

#[test]
fn test_parse_from_str() {
    let raw = r#"{"header":{"id":"a","channel":"q","expiration":5,"correlationID":"z"},"body":"hi"}"#;
    let msg: Message = raw.parse().unwrap();
    assert_eq!(msg.header, MessageHeader::new("a", "q", 5, "z"));
    assert_eq!(msg.body, json!("hi"));
}

#[test]
fn test_missing_field_is_malformed() {
    let raw = br#"{"header":{"id":"a","channel":"q","expiration":5},"body":null}"#;
    let err = Message::from_json(raw).unwrap_err();
    assert!(matches!(err, MessageError::Malformed(_)));
    assert!(err.to_string().contains("correlationID"));
}

#[test]
fn test_wrong_type_is_malformed() {
    let raw = br#"{"header":{"id":"a","channel":"q","expiration":"soon","correlationID":""},"body":1}"#;
    assert!(Message::from_json(raw).is_err());

    let raw = br#"{"header":{"id":"a","channel":"q","expiration":-1,"correlationID":""},"body":1}"#;
    assert!(Message::from_json(raw).is_err());
}

#[test]
fn test_non_json_is_malformed() {
    assert!(Message::from_json(b"not json").is_err());
    assert!(Message::from_json(&[0xff, 0xfe]).is_err());
    assert!(Message::from_json(b"").is_err());
}

#[test]
fn test_reply_correlates_to_request() {
    let request = Message::new("orders", json!("ping"));
    let reply = Message::reply(&request, json!("pong"));
    assert_eq!(reply.header.correlation_id, request.header.id);
    assert_eq!(reply.channel(), "orders");
    assert_ne!(reply.id(), request.id());
    assert!(reply.header.is_reply());
}

#[test]
fn test_time_to_live() {
    let header = MessageHeader::new("a", "q", 0, "");
    assert_eq!(header.time_to_live(1_000), None);
    assert!(!header.is_expired_at(u64::MAX));

    let header = MessageHeader::new("a", "q", 1_500, "");
    assert_eq!(header.time_to_live(1_000), Some(Duration::from_millis(500)));
    assert_eq!(header.time_to_live(2_000), Some(Duration::ZERO));
    assert!(!header.is_expired_at(1_499));
    assert!(header.is_expired_at(1_500));
}

#[test]
fn test_with_time_to_live_sets_absolute_deadline() {
    let before = now_millis();
    let msg = Message::with_time_to_live("q", Value::Null, Duration::from_millis(250));
    let after = now_millis();
    assert!(msg.header.expiration >= before + 250);
    assert!(msg.header.expiration <= after + 250);
}

fn arb_body() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        ".*".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn test_round_trip(
        id in ".*",
        channel in ".*",
        expiration in any::<u64>(),
        correlation_id in ".*",
        body in arb_body(),
    ) {
        let msg = Message::from_parts(MessageHeader::new(id, channel, expiration, correlation_id), body);
        let decoded = Message::from_json(msg.to_json().as_bytes()).unwrap();
        prop_assert_eq!(decoded, msg);
    }
}
