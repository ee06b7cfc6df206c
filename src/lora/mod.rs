//! The `lora` module bridges a LoRaWAN network server to the platform.
//!
//! Things and channels are paired with device EUIs and application IDs in
//! the route map; a thing connected to a channel is recorded under the
//! `connection` namespace as `<chan_id>:<thing_id>`. Uplinks are translated
//! into canonical messages published by the thing they came from, and
//! `Forwarder` turns bus messages back into downlinks.

pub mod forwarder;

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::broker::{Message, Protocol, Publisher};
use crate::persistence::{Namespace, RouteMapRepository};
use crate::utils::{Error, Result};

pub use forwarder::{Downlink, DownlinkPublisher, Forwarder};

/// Uplink frame as emitted by the network server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Uplink {
    #[serde(rename = "applicationID")]
    pub application_id: String,
    #[serde(rename = "applicationName", default)]
    pub application_name: String,
    #[serde(rename = "devEUI")]
    pub dev_eui: String,
    #[serde(rename = "deviceName", default)]
    pub device_name: String,
    #[serde(rename = "fPort", default)]
    pub f_port: u8,
    /// Base64-encoded frame payload.
    #[serde(default)]
    pub data: String,
    /// Payload decoded by the network server's codec, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
}

impl Uplink {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Bytes forwarded to the bus: the decoded object when present, the raw
    /// frame otherwise.
    pub fn payload(&self) -> Result<Vec<u8>> {
        match &self.object {
            Some(object) => Ok(serde_json::to_vec(object)?),
            None => STANDARD
                .decode(&self.data)
                .map_err(|e| Error::MalformedPayload(e.to_string())),
        }
    }
}

/// Route map key of a thing-to-channel connection.
pub fn connection_id(chan_id: &str, thing_id: &str) -> String {
    format!("{chan_id}:{thing_id}")
}

#[derive(Clone)]
pub struct LoraService {
    routes: Arc<dyn RouteMapRepository>,
    publisher: Arc<dyn Publisher>,
}

impl LoraService {
    pub fn new(routes: Arc<dyn RouteMapRepository>, publisher: Arc<dyn Publisher>) -> Self {
        Self { routes, publisher }
    }

    pub fn routes(&self) -> &Arc<dyn RouteMapRepository> {
        &self.routes
    }

    pub fn create_thing(&self, thing_id: &str, dev_eui: &str) -> Result<()> {
        self.routes.save(thing_id, dev_eui, Namespace::Thing)?;
        info!(thing_id, dev_eui, "mapped thing");
        Ok(())
    }

    pub fn update_thing(&self, thing_id: &str, dev_eui: &str) -> Result<()> {
        self.create_thing(thing_id, dev_eui)
    }

    pub fn remove_thing(&self, thing_id: &str) -> Result<()> {
        self.routes.remove(thing_id, Namespace::Thing)?;
        info!(thing_id, "unmapped thing");
        Ok(())
    }

    pub fn create_channel(&self, chan_id: &str, app_id: &str) -> Result<()> {
        self.routes.save(chan_id, app_id, Namespace::Channel)?;
        info!(chan_id, app_id, "mapped channel");
        Ok(())
    }

    pub fn update_channel(&self, chan_id: &str, app_id: &str) -> Result<()> {
        self.create_channel(chan_id, app_id)
    }

    pub fn remove_channel(&self, chan_id: &str) -> Result<()> {
        self.routes.remove(chan_id, Namespace::Channel)?;
        info!(chan_id, "unmapped channel");
        Ok(())
    }

    /// Records that `thing_id` may exchange messages on `chan_id`. Both must
    /// already be mapped.
    pub fn connect_thing(&self, chan_id: &str, thing_id: &str) -> Result<()> {
        self.routes.get(chan_id, Namespace::Channel)?;
        self.routes.get(thing_id, Namespace::Thing)?;

        let conn = connection_id(chan_id, thing_id);
        self.routes.save(&conn, &conn, Namespace::Connection)?;
        info!(chan_id, thing_id, "connected thing");
        Ok(())
    }

    pub fn disconnect_thing(&self, chan_id: &str, thing_id: &str) -> Result<()> {
        self.routes.get(chan_id, Namespace::Channel)?;
        self.routes.get(thing_id, Namespace::Thing)?;

        self.routes
            .remove(&connection_id(chan_id, thing_id), Namespace::Connection)?;
        info!(chan_id, thing_id, "disconnected thing");
        Ok(())
    }

    /// Translates an uplink into a message published by the originating
    /// thing. The device must be connected to the application's channel.
    pub async fn publish(&self, uplink: &Uplink) -> Result<Message> {
        let channel = self
            .routes
            .get(&uplink.application_id, Namespace::Channel)?;
        let thing = self.routes.get(&uplink.dev_eui, Namespace::Thing)?;

        match self
            .routes
            .get(&connection_id(&channel, &thing), Namespace::Connection)
        {
            Ok(_) => {}
            Err(Error::RouteNotFound) => return Err(Error::NotConnectedRoute),
            Err(e) => return Err(e),
        }

        let mut msg = Message::new(Protocol::Lora, &channel, "", uplink.payload()?);
        msg.publisher = thing;

        self.publisher
            .publish(&msg.channel, &msg)
            .await
            .map_err(Error::publish_failed)?;
        debug!(channel = %msg.channel, publisher = %msg.publisher, "forwarded uplink");
        Ok(msg)
    }
}
