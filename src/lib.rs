//! # chanbridge
//!
//! `chanbridge` is the protocol-adapter core of an IoT messaging platform.
//! Devices talk HTTP, MQTT, WebSocket or LoRaWAN; every adapter normalizes
//! what it receives into one canonical `Message`, authorizes the sender
//! against a central policy service and publishes the result on an internal
//! subject bus.
//!
//! ## Core Modules
//!
//! - `broker`: the canonical message, the topic grammar and the in-process bus.
//! - `session`: per-connection state and the protocol handlers driving it.
//! - `authz`: client of the policy/identity service.
//! - `persistence`: the bidirectional route map (sled).
//! - `events`: keeps the route map in sync with entity lifecycle events.
//! - `lora`: LoRaWAN uplink translation and downlink forwarding.
//! - `transport`: the WebSocket server.
//! - `config`: layered configuration loading.
//! - `utils`: error taxonomy and logging.

pub mod authz;
pub mod broker;
pub mod config;
pub mod events;
pub mod lora;
pub mod persistence;
pub mod session;
pub mod transport;
pub mod utils;
