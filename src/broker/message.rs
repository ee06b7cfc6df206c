//! Message definitions for the bus
//!
//! `Message` is the canonical envelope every protocol adapter normalizes
//! into before publishing on the internal bus.
//!
//! Notes on fields:
//! - `channel`: routing address, the captured `<id>` of the wire topic
//! - `subtopic`: dot-separated suffix, empty when the topic has none
//! - `payload`: raw bytes, carried as standard base64 in the JSON envelope
//! - `publisher`: authorized principal; empty until the gateway grants access
//! - `created`: nanoseconds since UNIX epoch

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Mqtt,
    Coap,
    Websocket,
    Lora,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Http => "http",
            Protocol::Mqtt => "mqtt",
            Protocol::Coap => "coap",
            Protocol::Websocket => "websocket",
            Protocol::Lora => "lora",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub protocol: Protocol,
    pub channel: String,
    #[serde(default)]
    pub subtopic: String,
    #[serde(with = "base64_payload")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub publisher: String,
    pub created: i64,
}

impl Message {
    /// Builds an unauthorized message stamped with the current time.
    pub fn new(protocol: Protocol, channel: &str, subtopic: &str, payload: Vec<u8>) -> Self {
        Self {
            protocol,
            channel: channel.to_string(),
            subtopic: subtopic.to_string(),
            payload,
            publisher: String::new(),
            created: now_nanos(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

/// Nanoseconds since the epoch. Falls back to microsecond precision for
/// instants outside the `i64` nanosecond range.
pub fn now_nanos() -> i64 {
    let now = chrono::Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000))
}

mod base64_payload {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
