//! Integration feed
//!
//! A WebSocket endpoint for the two upstream producers of the LoRa bridge:
//! the network server relays device uplinks, and the platform's entity
//! service streams lifecycle events. Frames are applied in arrival order and
//! each one is answered with an `ack` or an `error` frame.
//!
//! Uplinks are published straight through `LoraService`. Events are handed to
//! the bus on the events subject so they reach the consumer in the same
//! order as every other event source.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::lora::LoraService;
use crate::transport::message::{FeedMessage, ServerMessage};
use crate::utils::{Error, Result};

const UPLINK: &str = "uplink";
const EVENT: &str = "event";

/// Where feed frames go.
#[derive(Clone)]
pub struct Feed {
    lora: Arc<LoraService>,
    broker: Arc<Broker>,
    events_subject: String,
}

impl Feed {
    pub fn new(lora: Arc<LoraService>, broker: Arc<Broker>, events_subject: &str) -> Self {
        Self {
            lora,
            broker,
            events_subject: events_subject.to_string(),
        }
    }

    /// Applies one frame and returns the reply to send back.
    pub async fn apply(&self, frame: FeedMessage) -> ServerMessage {
        match frame {
            FeedMessage::Uplink(uplink) => match self.lora.publish(&uplink).await {
                Ok(msg) => {
                    debug!(channel = %msg.channel, dev_eui = %uplink.dev_eui, "uplink accepted");
                    ServerMessage::ack(UPLINK)
                }
                Err(e) => {
                    warn!(app = %uplink.application_id, dev_eui = %uplink.dev_eui, error = %e, "uplink rejected");
                    ServerMessage::error(e)
                }
            },
            FeedMessage::Event(event) => {
                let delivered = serde_json::to_vec(&event)
                    .map_err(Error::from)
                    .and_then(|payload| self.broker.publish_raw(&self.events_subject, payload));
                match delivered {
                    Ok(0) => {
                        warn!(operation = %event.operation, id = %event.id, "no event consumer attached");
                        ServerMessage::ack(EVENT)
                    }
                    Ok(_) => ServerMessage::ack(EVENT),
                    Err(e) => ServerMessage::error(e),
                }
            }
        }
    }
}

pub async fn start_feed_server(
    addr: &str,
    feed: Arc<Feed>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_feed(listener, feed, shutdown).await
}

/// Accepts feed connections on an already bound listener until `shutdown`
/// fires.
pub async fn serve_feed(
    listener: TcpListener,
    feed: Arc<Feed>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "integration feed listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept feed connection");
                    continue;
                }
            },
        };

        let feed = feed.clone();
        let shutdown = shutdown.child_token();
        tokio::spawn(async move {
            info!(%peer, "feed peer connected");
            handle_feed_connection(stream, feed, shutdown).await;
            info!(%peer, "feed peer disconnected");
        });
    }

    info!("integration feed stopped");
    Ok(())
}

async fn handle_feed_connection(stream: TcpStream, feed: Arc<Feed>, shutdown: CancellationToken) {
    let mut ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "feed handshake failed");
            return;
        }
    };

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = ws_stream.next() => next,
        };
        let text = match next {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "feed read failed");
                break;
            }
        };

        let reply = match serde_json::from_str::<FeedMessage>(text.as_str()) {
            Ok(frame) => feed.apply(frame).await,
            Err(e) => {
                warn!(error = %e, "invalid feed frame");
                ServerMessage::error(format!("invalid frame: {e}"))
            }
        };
        let reply = match serde_json::to_string(&reply) {
            Ok(json) => WsMessage::text(json),
            Err(e) => {
                error!(error = %e, "failed to encode feed reply");
                continue;
            }
        };
        if ws_stream.send(reply).await.is_err() {
            break;
        }
    }

    let _ = ws_stream.close(None).await;
}
