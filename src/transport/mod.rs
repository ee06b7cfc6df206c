//! The `transport` module is responsible for handling network communication
//! with clients over WebSockets.
//!
//! It defines the JSON frames exchanged with clients and the server loop that
//! drives a `session::Handler` per connection: the upgrade request supplies
//! the credential, publish frames go through the handler, and subscriptions
//! stream bus deliveries back to the client.
//!
//! `feed` is the second listener, meant for integration peers rather than
//! devices: it takes LoRa uplinks and entity lifecycle events.

pub mod feed;
pub mod message;
pub mod websocket;
