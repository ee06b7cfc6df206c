use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::broker::Message;
use crate::events::LifecycleEvent;
use crate::lora::Uplink;

/// Frames a WebSocket client sends.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },

    #[serde(rename = "publish")]
    Publish { topic: String, payload: String },
}

/// Frames an integration peer sends to the feed endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FeedMessage {
    /// An uplink relayed by the LoRa network server.
    #[serde(rename = "uplink")]
    Uplink(Uplink),

    /// An entity lifecycle event from the platform's event source.
    #[serde(rename = "event")]
    Event(LifecycleEvent),
}

pub const BASE64_ENCODING: &str = "base64";

/// Frames the server pushes to a WebSocket client.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "message")]
    Message {
        subject: String,
        channel: String,
        #[serde(default)]
        subtopic: String,
        publisher: String,
        protocol: String,
        payload: String,
        /// `"base64"` when the payload is not valid UTF-8.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encoding: Option<String>,
        created: i64,
    },

    #[serde(rename = "error")]
    Error { message: String },

    /// Feed frame accepted. `kind` echoes the frame type.
    #[serde(rename = "ack")]
    Ack { kind: String },
}

impl ServerMessage {
    pub fn delivery(subject: &str, msg: Message) -> Self {
        let (payload, encoding) = match String::from_utf8(msg.payload) {
            Ok(text) => (text, None),
            Err(e) => (STANDARD.encode(e.as_bytes()), Some(BASE64_ENCODING.to_string())),
        };
        ServerMessage::Message {
            subject: subject.to_string(),
            channel: msg.channel,
            subtopic: msg.subtopic,
            publisher: msg.publisher,
            protocol: msg.protocol.to_string(),
            payload,
            encoding,
            created: msg.created,
        }
    }

    pub fn ack(kind: &str) -> Self {
        ServerMessage::Ack {
            kind: kind.to_string(),
        }
    }

    pub fn error(err: impl ToString) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
        }
    }
}
