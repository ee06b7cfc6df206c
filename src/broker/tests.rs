use super::topic::{Topic, parse_topic, subject, subject_matches};
use super::{Broker, Message, Protocol, Publisher};
use crate::utils::Error;
use tokio::sync::mpsc;

#[test]
fn test_topic_new() {
    let topic = Topic::new("channels.c1.>");
    assert_eq!(topic.pattern, "channels.c1.>");
    assert!(topic.subscribers.is_empty());
}

#[test]
fn test_topic_subscribe_and_unsubscribe() {
    let mut topic = Topic::new("channels.c1");
    topic.subscribe("client1".to_string());
    assert!(topic.subscribers.contains("client1"));
    topic.unsubscribe(&"client1".to_string());
    assert!(!topic.subscribers.contains("client1"));
}

#[test]
fn test_parse_topic_without_subtopic() {
    let (channel, subtopic) = parse_topic("channels/c1/messages").unwrap();
    assert_eq!(channel, "c1");
    assert_eq!(subtopic, "");

    let (channel, subtopic) = parse_topic("/channels/c-1_x/messages?ct=json").unwrap();
    assert_eq!(channel, "c-1_x");
    assert_eq!(subtopic, "");
}

#[test]
fn test_parse_topic_normalizes_subtopic() {
    let cases = [
        ("channels/c1/messages/a/b", "a.b"),
        ("channels/c1/messages//a///b/", "a.b"),
        ("channels/c1/messages/a.b/c", "a.b.c"),
        ("channels/c1/messages/a%2Fb/c", "a.b.c"),
        ("channels/c1/messages/temp/room+1?ct=senml", "temp.room 1"),
        ("channels/c1/messages/a/*", "a.*"),
        ("channels/c1/messages/a/>", "a.>"),
        ("channels/c1/messages/", ""),
    ];
    for (raw, expected) in cases {
        let (channel, subtopic) = parse_topic(raw).unwrap();
        assert_eq!(channel, "c1", "{raw}");
        assert_eq!(subtopic, expected, "{raw}");
        assert!(subtopic.split('.').all(|s| !s.is_empty()) || subtopic.is_empty());
    }
}

#[test]
fn test_parse_topic_rejects_malformed_topics() {
    for raw in [
        "",
        "channels",
        "channels//messages",
        "channels/c1",
        "channels/c1/msgs/a",
        "things/c1/messages",
        "channels/c.1/messages",
        "xchannels/c1/messages",
    ] {
        assert!(
            matches!(parse_topic(raw), Err(Error::MalformedTopic)),
            "{raw} should be malformed"
        );
    }
}

#[test]
fn test_parse_topic_rejects_misplaced_wildcards() {
    for raw in [
        "channels/c1/messages/a/*/b",
        "channels/c1/messages/a*/b",
        "channels/c1/messages/a/b>",
        "channels/c1/messages/>/a",
        "channels/c1/messages/a/%2A%2A",
    ] {
        assert!(
            matches!(parse_topic(raw), Err(Error::MalformedSubtopic)),
            "{raw} should have a malformed subtopic"
        );
    }
}

#[test]
fn test_parse_topic_rejects_bad_escapes() {
    for raw in [
        "channels/c1/messages/a%",
        "channels/c1/messages/a%2",
        "channels/c1/messages/a%zz",
        "channels/c1/messages/a%ff",
    ] {
        assert!(
            matches!(parse_topic(raw), Err(Error::MalformedSubtopic)),
            "{raw} should have a malformed subtopic"
        );
    }
}

#[test]
fn test_subject_composition() {
    assert_eq!(subject("channels", "c1", ""), "channels.c1");
    assert_eq!(subject("channels", "c1", "a.b"), "channels.c1.a.b");
    assert_eq!(subject("", "c1", "a"), "c1.a");
}

#[test]
fn test_subject_matching() {
    assert!(subject_matches("channels.c1", "channels.c1"));
    assert!(!subject_matches("channels.c1", "channels.c1.a"));
    assert!(subject_matches("channels.*", "channels.c1"));
    assert!(!subject_matches("channels.*", "channels.c1.a"));
    assert!(subject_matches("channels.>", "channels.c1.a.b"));
    assert!(!subject_matches("channels.>", "channels"));
    assert!(subject_matches("channels.*.a", "channels.c9.a"));
    assert!(!subject_matches("channels.>.a", "channels.c9.a"));
}

fn authorized_message(channel: &str, subtopic: &str) -> Message {
    let mut msg = Message::new(Protocol::Mqtt, channel, subtopic, b"hello".to_vec());
    msg.publisher = "p1".to_string();
    msg
}

#[test]
fn test_broker_register_and_remove_client() {
    let broker = Broker::default();
    let (tx, _rx) = mpsc::unbounded_channel();
    broker.register_client("client1".to_string(), tx);
    assert!(broker.has_client(&"client1".to_string()));

    broker.remove_client(&"client1".to_string());
    assert!(!broker.has_client(&"client1".to_string()));
}

#[test]
fn test_broker_subscribe_and_unsubscribe() {
    let broker = Broker::default();
    broker.subscribe("channels.c1", "client1".to_string());
    assert_eq!(broker.subscriber_count("channels.c1"), 1);

    broker.unsubscribe("channels.c1", &"client1".to_string());
    assert_eq!(broker.subscriber_count("channels.c1"), 0);
}

#[tokio::test]
async fn test_broker_publish_delivers_envelope() {
    let broker = Broker::default();
    let (tx, mut rx) = mpsc::unbounded_channel();
    broker.register_client("client1".to_string(), tx);
    broker.subscribe("channels.c1.>", "client1".to_string());

    let msg = authorized_message("c1", "temp.kitchen");
    broker.publish("c1", &msg).await.unwrap();

    let delivery = rx.try_recv().unwrap();
    assert_eq!(delivery.subject, "channels.c1.temp.kitchen");
    let received = Message::from_json(&delivery.payload).unwrap();
    assert_eq!(received, msg);
}

#[tokio::test]
async fn test_broker_publish_only_matching_subjects() {
    let broker = Broker::default();
    let (tx, mut rx) = mpsc::unbounded_channel();
    broker.register_client("client1".to_string(), tx);
    broker.subscribe("channels.c2", "client1".to_string());

    broker
        .publish("c1", &authorized_message("c1", ""))
        .await
        .unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_broker_rejects_unauthorized_message() {
    let broker = Broker::default();
    let msg = Message::new(Protocol::Http, "c1", "", b"x".to_vec());
    let err = broker.publish("c1", &msg).await.unwrap_err();
    assert!(matches!(err, Error::Bus(_)));
}

#[tokio::test]
async fn test_broker_rejects_empty_channel() {
    let broker = Broker::default();
    let err = broker
        .publish("", &authorized_message("c1", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Bus(_)));
}

#[tokio::test]
async fn test_broker_publish_after_close_fails() {
    let broker = Broker::default();
    broker.close();
    assert!(broker.is_closed());
    let err = broker
        .publish("c1", &authorized_message("c1", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Bus(_)));
}

#[test]
fn test_broker_cleanup_client() {
    let broker = Broker::default();
    let (tx, _rx) = mpsc::unbounded_channel();
    broker.register_client("client1".to_string(), tx);
    broker.subscribe("channels.c1", "client1".to_string());
    broker.subscribe("channels.c2", "client1".to_string());

    broker.cleanup_client(&"client1".to_string());
    assert!(!broker.has_client(&"client1".to_string()));
    assert_eq!(broker.subscriber_count("channels.c1"), 0);
    assert_eq!(broker.subscriber_count("channels.c2"), 0);
}

#[test]
fn test_publish_to_client_with_closed_channel() {
    let broker = Broker::default();
    let (tx, rx) = mpsc::unbounded_channel();
    broker.register_client("client1".to_string(), tx);
    broker.subscribe("channels.c1", "client1".to_string());

    drop(rx);

    let delivered = broker.publish_raw("channels.c1", b"{}".to_vec()).unwrap();
    assert_eq!(delivered, 0);
}

#[test]
fn test_message_json_envelope() {
    let mut msg = authorized_message("c1", "a");
    msg.created = 42;
    let json: serde_json::Value = serde_json::from_slice(&msg.to_json().unwrap()).unwrap();
    assert_eq!(json["protocol"], "mqtt");
    assert_eq!(json["payload"], "aGVsbG8=");
    assert_eq!(json["publisher"], "p1");
    assert_eq!(json["created"], 42);
}

#[test]
fn test_attach_registers_and_subscribes() {
    let broker = Broker::default();
    let mut rx = broker.attach("forwarder", "channels.>");
    assert!(broker.has_client(&"forwarder".to_string()));
    assert_eq!(broker.subscriber_count("channels.>"), 1);

    broker.publish_raw("channels.c1.temp", b"{}".to_vec()).unwrap();
    assert_eq!(rx.try_recv().unwrap().subject, "channels.c1.temp");
}
