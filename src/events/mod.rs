//! The `events` module keeps the route map in sync with the platform's
//! entity lifecycle stream.
//!
//! Each event names an operation (`thing.create`, `channel.remove`, ...) and
//! carries the entity ID and optional JSON metadata. Only entities whose
//! metadata holds the bridge key (`"lora"` by default) are mirrored; every
//! other create/update event is ignored without error.

pub mod consumer;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::lora::LoraService;
use crate::utils::{Error, Result};

pub const DEFAULT_METADATA_KEY: &str = "lora";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub operation: String,
    #[serde(default)]
    pub id: String,
    /// JSON-encoded metadata object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thing_id: Option<String>,
}

impl LifecycleEvent {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::EventDecode(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ThingCreate,
    ThingUpdate,
    ThingRemove,
    ThingConnect,
    ThingDisconnect,
    ChannelCreate,
    ChannelUpdate,
    ChannelRemove,
}

impl Operation {
    /// `None` for operations the synchronizer does not handle.
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "thing.create" => Operation::ThingCreate,
            "thing.update" => Operation::ThingUpdate,
            "thing.remove" => Operation::ThingRemove,
            "thing.connect" => Operation::ThingConnect,
            "thing.disconnect" => Operation::ThingDisconnect,
            "channel.create" => Operation::ChannelCreate,
            "channel.update" => Operation::ChannelUpdate,
            "channel.remove" => Operation::ChannelRemove,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ThingCreate => "thing.create",
            Operation::ThingUpdate => "thing.update",
            Operation::ThingRemove => "thing.remove",
            Operation::ThingConnect => "thing.connect",
            Operation::ThingDisconnect => "thing.disconnect",
            Operation::ChannelCreate => "channel.create",
            Operation::ChannelUpdate => "channel.update",
            Operation::ChannelRemove => "channel.remove",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies lifecycle events to the LoRa route map.
#[derive(Clone)]
pub struct EventHandler {
    lora: Arc<LoraService>,
    metadata_key: String,
}

impl EventHandler {
    pub fn new(lora: Arc<LoraService>) -> Self {
        Self {
            lora,
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
        }
    }

    pub fn with_metadata_key(mut self, key: &str) -> Self {
        self.metadata_key = key.to_string();
        self
    }

    pub fn handle(&self, event: &LifecycleEvent) -> Result<()> {
        let Some(op) = Operation::parse(&event.operation) else {
            debug!(operation = %event.operation, "ignoring event");
            return Ok(());
        };

        match op {
            Operation::ThingCreate | Operation::ThingUpdate => {
                let Some(meta) = self.bridge_metadata(event)? else {
                    return Ok(());
                };
                let dev_eui = required_field(&meta, "dev_eui")?;
                self.lora.create_thing(&event.id, &dev_eui)
            }
            Operation::ChannelCreate | Operation::ChannelUpdate => {
                let Some(meta) = self.bridge_metadata(event)? else {
                    return Ok(());
                };
                let app_id = required_field(&meta, "app_id")?;
                self.lora.create_channel(&event.id, &app_id)
            }
            Operation::ThingRemove => self.lora.remove_thing(&event.id),
            Operation::ChannelRemove => self.lora.remove_channel(&event.id),
            Operation::ThingConnect => {
                let (chan_id, thing_id) = connection_ids(event)?;
                self.lora.connect_thing(chan_id, thing_id)
            }
            Operation::ThingDisconnect => {
                let (chan_id, thing_id) = connection_ids(event)?;
                self.lora.disconnect_thing(chan_id, thing_id)
            }
        }
    }

    /// The bridge's slice of the event metadata, or `None` when the entity
    /// is not bridged.
    fn bridge_metadata(&self, event: &LifecycleEvent) -> Result<Option<Map<String, Value>>> {
        let raw = event.metadata.as_deref().unwrap_or("").trim();
        if raw.is_empty() {
            return Ok(None);
        }

        let metadata: Value =
            serde_json::from_str(raw).map_err(|e| Error::EventDecode(e.to_string()))?;
        let Value::Object(mut metadata) = metadata else {
            return Err(Error::EventDecode("metadata is not an object".to_string()));
        };

        match metadata.remove(&self.metadata_key) {
            None => Ok(None),
            Some(Value::Object(bridge)) => Ok(Some(bridge)),
            Some(_) => Err(Error::EventDecode(format!(
                "{} metadata is not an object",
                self.metadata_key
            ))),
        }
    }
}

fn required_field(meta: &Map<String, Value>, field: &str) -> Result<String> {
    match meta.get(field).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(Error::EventDecode(format!("missing {field}"))),
    }
}

fn connection_ids(event: &LifecycleEvent) -> Result<(&str, &str)> {
    let chan_id = event
        .chan_id
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::EventDecode("missing chan_id".to_string()))?;
    let thing_id = event
        .thing_id
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(event.id.as_str());
    if thing_id.is_empty() {
        return Err(Error::EventDecode("missing thing_id".to_string()));
    }
    Ok((chan_id, thing_id))
}
