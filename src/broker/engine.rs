//! Broker engine
//!
//! This module contains the in-process bus responsible for:
//! - managing subject patterns and subscriber lists
//! - publishing serialized `Message` envelopes to every matching subscriber
//! - refusing messages once the bus has been closed
//!
//! Concurrency and usage notes:
//! - The broker is shared as `Arc<Broker>` between sessions, the event
//!   consumer and the downlink forwarder. State lives behind one `RwLock`
//!   that is never held across an `.await`.
//! - Delivery goes through unbounded channels, so a slow subscriber never
//!   blocks a publisher. A subscriber whose receiver is gone is logged and
//!   skipped.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::broker::message::Message;
use crate::broker::topic::{self, SubscriberId, Topic};
use crate::utils::{Error, Result};

/// Publishing side of the internal bus, addressed by channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, msg: &Message) -> Result<()>;
}

/// A payload delivered to a subscriber together with the concrete subject
/// it was published on.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subject: String,
    pub payload: Vec<u8>,
}

pub type DeliverySender = UnboundedSender<Delivery>;

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    clients: HashMap<SubscriberId, DeliverySender>,
    closed: bool,
}

#[derive(Debug)]
pub struct Broker {
    prefix: String,
    state: RwLock<State>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

impl Broker {
    pub const DEFAULT_PREFIX: &'static str = "channels";

    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            state: RwLock::new(State::default()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Subject a message for `channel`/`subtopic` is published on.
    pub fn subject_for(&self, channel: &str, subtopic: &str) -> String {
        topic::subject(&self.prefix, channel, subtopic)
    }

    pub fn register_client(&self, id: SubscriberId, sender: DeliverySender) {
        self.write().clients.insert(id, sender);
    }

    pub fn remove_client(&self, id: &SubscriberId) {
        self.write().clients.remove(id);
    }

    /// Subscribes a client to a subject pattern. The pattern entry is created
    /// on first use.
    pub fn subscribe(&self, pattern: &str, subscriber: SubscriberId) {
        let mut state = self.write();
        state
            .topics
            .entry(pattern.to_string())
            .or_insert_with(|| Topic::new(pattern))
            .subscribe(subscriber);
    }

    /// Registers `id` as a client subscribed to `pattern` and returns the
    /// receiving end of its delivery channel.
    pub fn attach(&self, id: &str, pattern: &str) -> UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register_client(id.to_string(), tx);
        self.subscribe(pattern, id.to_string());
        rx
    }

    pub fn unsubscribe(&self, pattern: &str, subscriber: &SubscriberId) {
        let mut state = self.write();
        let now_empty = match state.topics.get_mut(pattern) {
            Some(t) => {
                t.unsubscribe(subscriber);
                t.subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            state.topics.remove(pattern);
        }
    }

    /// Removes a client and every subscription it holds.
    pub fn cleanup_client(&self, id: &SubscriberId) {
        let mut state = self.write();
        state.clients.remove(id);
        for t in state.topics.values_mut() {
            t.unsubscribe(id);
        }
        state.topics.retain(|_, t| !t.subscribers.is_empty());
        debug!(client_id = %id, "cleaned up bus client");
    }

    /// Publishes an already-encoded payload on a concrete subject.
    ///
    /// Returns the number of subscribers the payload was handed to.
    pub fn publish_raw(&self, subject: &str, payload: Vec<u8>) -> Result<usize> {
        let state = self.read();
        if state.closed {
            return Err(Error::Bus("broker is closed".to_string()));
        }

        let mut delivered = 0;
        for t in state.topics.values().filter(|t| t.matches(subject)) {
            for sub_id in &t.subscribers {
                let Some(sender) = state.clients.get(sub_id) else {
                    warn!(subscriber = %sub_id, "no client registered for subscription");
                    continue;
                };
                let delivery = Delivery {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                };
                match sender.send(delivery) {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!(subscriber = %sub_id, error = %e, "failed to deliver"),
                }
            }
        }

        debug!(subject, delivered, "published");
        Ok(delivered)
    }

    /// Stops accepting publishes and drops every client sender, which ends
    /// the subscribers' receive loops.
    pub fn close(&self) {
        let mut state = self.write();
        state.closed = true;
        state.clients.clear();
        state.topics.clear();
        info!(prefix = %self.prefix, "bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.read().closed
    }

    pub fn has_client(&self, id: &SubscriberId) -> bool {
        self.read().clients.contains_key(id)
    }

    pub fn subscriber_count(&self, pattern: &str) -> usize {
        self.read()
            .topics
            .get(pattern)
            .map_or(0, |t| t.subscribers.len())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Publisher for Broker {
    async fn publish(&self, channel: &str, msg: &Message) -> Result<()> {
        if channel.is_empty() {
            return Err(Error::Bus("empty channel".to_string()));
        }
        if msg.publisher.is_empty() {
            return Err(Error::Bus("message has no publisher".to_string()));
        }

        let subject = self.subject_for(channel, &msg.subtopic);
        let payload = msg.to_json()?;
        self.publish_raw(&subject, payload).map(|_| ())
    }
}
