//! Downlink forwarder
//!
//! Listens to the bus and relays every message of a LoRa-mapped channel to
//! the other devices connected to that channel. The device a message came
//! from never receives its own message back.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{Delivery, Message};
use crate::lora::connection_id;
use crate::persistence::{Namespace, RouteMapRepository};
use crate::utils::{Error, Result};

const DEFAULT_F_PORT: u8 = 2;

/// Downlink frame accepted by the network server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downlink {
    pub confirmed: bool,
    #[serde(rename = "fPort")]
    pub f_port: u8,
    /// Base64-encoded frame payload.
    pub data: String,
}

pub fn downlink_topic(app_id: &str, dev_eui: &str) -> String {
    format!("application/{app_id}/device/{dev_eui}/command/down")
}

/// Outbound side towards the network server.
#[async_trait]
pub trait DownlinkPublisher: Send + Sync {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

#[async_trait]
impl DownlinkPublisher for UnboundedSender<(String, Vec<u8>)> {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        UnboundedSender::send(self, (topic.to_string(), payload))
            .map_err(|_| Error::Bus("downlink receiver dropped".to_string()))
    }
}

pub struct Forwarder {
    routes: Arc<dyn RouteMapRepository>,
    downlinks: Arc<dyn DownlinkPublisher>,
    f_port: u8,
}

impl Forwarder {
    pub fn new(routes: Arc<dyn RouteMapRepository>, downlinks: Arc<dyn DownlinkPublisher>) -> Self {
        Self {
            routes,
            downlinks,
            f_port: DEFAULT_F_PORT,
        }
    }

    pub fn with_f_port(mut self, f_port: u8) -> Self {
        self.f_port = f_port;
        self
    }

    /// Sends `msg` to every device connected to its channel except the
    /// publisher. Returns the number of downlinks sent.
    pub async fn forward(&self, msg: &Message) -> Result<usize> {
        let app_id = match self.routes.get(&msg.channel, Namespace::Channel) {
            Ok(app_id) => app_id,
            Err(Error::RouteNotFound) => {
                debug!(channel = %msg.channel, "channel not mapped, skipping downlink");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let prefix = connection_id(&msg.channel, "");
        let data = STANDARD.encode(&msg.payload);
        let mut sent = 0;

        for conn in self.routes.keys(Namespace::Connection, &prefix)? {
            let Some(thing) = conn.strip_prefix(&prefix) else {
                continue;
            };
            if thing == msg.publisher {
                continue;
            }

            let dev_eui = match self.routes.get(thing, Namespace::Thing) {
                Ok(dev_eui) => dev_eui,
                Err(Error::RouteNotFound) => {
                    warn!(thing_id = thing, "connected thing has no device mapping");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let frame = Downlink {
                confirmed: false,
                f_port: self.f_port,
                data: data.clone(),
            };
            self.downlinks
                .send(&downlink_topic(&app_id, &dev_eui), serde_json::to_vec(&frame)?)
                .await?;
            sent += 1;
        }

        Ok(sent)
    }

    /// Forwards bus deliveries until the subscription ends or `shutdown`
    /// fires. Failures are logged per message.
    pub async fn run(&self, mut rx: UnboundedReceiver<Delivery>, shutdown: CancellationToken) {
        info!("downlink forwarder started");
        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                delivery = rx.recv() => match delivery {
                    Some(d) => d,
                    None => break,
                },
            };

            let msg = match Message::from_json(&delivery.payload) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(subject = %delivery.subject, error = %e, "undecodable bus message");
                    continue;
                }
            };
            if let Err(e) = self.forward(&msg).await {
                warn!(channel = %msg.channel, error = %e, "downlink failed");
            }
        }
        info!("downlink forwarder stopped");
    }
}
