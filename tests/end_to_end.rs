use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chanbridge::authz::{AuthzClient, AuthzRequest, AuthzResponse};
use chanbridge::broker::{Broker, Message, Protocol};
use chanbridge::events::{EventHandler, LifecycleEvent, consumer};
use chanbridge::lora::{Downlink, Forwarder, LoraService, Uplink};
use chanbridge::persistence::SledRouteMap;
use chanbridge::session::{Handler, HttpHandler, Session};
use chanbridge::transport::feed::{Feed, serve_feed};
use chanbridge::transport::message::{FeedMessage, ServerMessage};
use chanbridge::utils::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{WebSocketStream, client_async};
use tokio_util::sync::CancellationToken;

/// Grants every action to known tokens.
struct TokenTable(HashMap<&'static str, &'static str>);

#[async_trait]
impl AuthzClient for TokenTable {
    async fn authorize(&self, req: &AuthzRequest) -> Result<AuthzResponse> {
        Ok(match self.0.get(req.subject.as_str()) {
            Some(id) => AuthzResponse {
                authorized: true,
                id: id.to_string(),
            },
            None => AuthzResponse::default(),
        })
    }
}

fn event(operation: &str, id: &str, metadata: &str) -> FeedMessage {
    FeedMessage::Event(LifecycleEvent {
        operation: operation.to_string(),
        id: id.to_string(),
        metadata: Some(metadata.to_string()),
        ..LifecycleEvent::default()
    })
}

fn connect(chan_id: &str, thing_id: &str) -> FeedMessage {
    FeedMessage::Event(LifecycleEvent {
        operation: "thing.connect".to_string(),
        id: thing_id.to_string(),
        chan_id: Some(chan_id.to_string()),
        ..LifecycleEvent::default()
    })
}

async fn send_feed(ws: &mut WebSocketStream<TcpStream>, frame: &FeedMessage) -> ServerMessage {
    ws.send(WsMessage::Text(serde_json::to_string(frame).unwrap().into()))
        .await
        .unwrap();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a feed reply")
            .expect("feed closed")
            .unwrap();
        if let WsMessage::Text(text) = next {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn integration_lifecycle_uplink_and_downlink() {
    let dir = tempfile::tempdir().unwrap();
    let routes = Arc::new(SledRouteMap::open(dir.path().to_str().unwrap()).unwrap());
    let broker = Arc::new(Broker::default());
    let shutdown = CancellationToken::new();

    let lora = Arc::new(LoraService::new(routes.clone(), broker.clone()));
    let events = EventHandler::new(lora.clone());
    let stream = consumer::from_bus(&broker, "events.things");
    let consumer_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer::run(stream, &events, shutdown).await })
    };

    let (downlink_tx, mut downlinks) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
    let forwarder = Forwarder::new(routes.clone(), Arc::new(downlink_tx));
    let deliveries = broker.attach("lora-forwarder", "channels.>");
    let forwarder_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { forwarder.run(deliveries, shutdown).await })
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let feed_addr = listener.local_addr().unwrap();
    let feed = Arc::new(Feed::new(lora, broker.clone(), "events.things"));
    tokio::spawn(serve_feed(listener, feed, shutdown.clone()));
    let (mut ws, _) = client_async("ws://localhost/", TcpStream::connect(feed_addr).await.unwrap())
        .await
        .unwrap();

    for frame in [
        event("channel.create", "c1", r#"{"lora":{"app_id":"app1"}}"#),
        event("thing.create", "t1", r#"{"lora":{"dev_eui":"AABB"}}"#),
        event("thing.create", "t2", r#"{"lora":{"dev_eui":"CCDD"}}"#),
        event("thing.create", "t3", r#"{"owner":"someone"}"#),
        connect("c1", "t2"),
        connect("c1", "t1"),
    ] {
        let reply = send_feed(&mut ws, &frame).await;
        assert!(matches!(reply, ServerMessage::Ack { .. }), "{reply:?}");
    }

    // events apply in order, so an accepted uplink means both things are connected
    let uplink = FeedMessage::Uplink(Uplink {
        application_id: "app1".to_string(),
        dev_eui: "AABB".to_string(),
        data: "aGVsbG8=".to_string(),
        ..Uplink::default()
    });
    let mut connected = false;
    for _ in 0..100 {
        if let ServerMessage::Ack { .. } = send_feed(&mut ws, &uplink).await {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(connected, "uplink never accepted");

    let (topic, payload) = tokio::time::timeout(Duration::from_secs(2), downlinks.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(topic, "application/app1/device/CCDD/command/down");
    let frame: Downlink = serde_json::from_slice(&payload).unwrap();
    assert_eq!(frame.data, "aGVsbG8=");

    let handler = HttpHandler::new(
        Arc::new(TokenTable(HashMap::from([("tok1", "p1")]))),
        broker.clone(),
    );
    let session = Session::with_credential("tok1");
    handler.auth_connect(&session).await.unwrap();
    let msg: Message = handler
        .publish(&session, "channels/c1/messages?ct=json", b"{}".to_vec())
        .await
        .unwrap();
    assert_eq!(msg.protocol, Protocol::Http);
    assert_eq!(msg.publisher, "p1");

    let mut sent = Vec::new();
    for _ in 0..2 {
        let (topic, _) = tokio::time::timeout(Duration::from_secs(2), downlinks.recv())
            .await
            .unwrap()
            .unwrap();
        sent.push(topic);
    }
    sent.sort();
    assert_eq!(
        sent,
        vec![
            "application/app1/device/AABB/command/down",
            "application/app1/device/CCDD/command/down",
        ]
    );

    shutdown.cancel();
    broker.close();
    assert_eq!(consumer_task.await.unwrap(), 6);
    forwarder_task.await.unwrap();
}
