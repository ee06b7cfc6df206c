//! The `broker` module holds the canonical message model, the topic grammar
//! shared by every protocol adapter, and the in-process subject bus that
//! normalized messages are published on.

pub mod engine;
pub mod message;
pub mod topic;

pub use engine::{Broker, Delivery, Publisher};
pub use message::{Message, Protocol};

#[cfg(test)]
mod tests;
