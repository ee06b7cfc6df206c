//! Adapter hooks for long-lived sessions (MQTT, WebSocket).
//!
//! `auth_publish` and `auth_subscribe` ask the policy service on every call.
//! `subscribe`/`unsubscribe` only record the lifecycle; the transport owns
//! the actual bus subscription.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::authz::{Action, AuthzClient};
use crate::broker::{Message, Protocol, Publisher};
use crate::session::Handler;
use crate::session::ingress::Ingress;
use crate::session::state::{Session, SessionState};
use crate::utils::{Error, Result};

#[derive(Clone)]
pub struct PersistentHandler {
    ingress: Ingress,
}

impl PersistentHandler {
    pub fn new(
        protocol: Protocol,
        authz: Arc<dyn AuthzClient>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            ingress: Ingress::new(protocol, authz, publisher),
        }
    }

    pub fn from_ingress(ingress: Ingress) -> Self {
        Self { ingress }
    }

    pub fn protocol(&self) -> Protocol {
        self.ingress.protocol()
    }
}

#[async_trait]
impl Handler for PersistentHandler {
    async fn auth_connect(&self, session: &Session) -> Result<()> {
        self.ingress.auth_connect(session)?;
        info!(session = %session.id(), protocol = %self.protocol(), "authenticating");
        Ok(())
    }

    async fn auth_publish(&self, session: &Session, topic: &str, _payload: &[u8]) -> Result<()> {
        session.ensure_active()?;
        self.ingress
            .authorize_topic(session, topic, Action::Publish)
            .await
            .map(|_| ())
    }

    async fn auth_subscribe(&self, session: &Session, topics: &[String]) -> Result<()> {
        session.ensure_active()?;
        if topics.is_empty() {
            return Err(Error::MalformedTopic);
        }
        for topic in topics {
            self.ingress
                .authorize_topic(session, topic, Action::Subscribe)
                .await?;
        }
        Ok(())
    }

    async fn connect(&self, session: &Session) -> Result<()> {
        session.mark_connected()?;
        info!(session = %session.id(), protocol = %self.protocol(), "connected");
        Ok(())
    }

    async fn publish(&self, session: &Session, topic: &str, payload: Vec<u8>) -> Result<Message> {
        let _op = session.begin(SessionState::Publishing)?;
        self.ingress.publish(session, topic, payload).await
    }

    async fn subscribe(&self, session: &Session, topics: &[String]) -> Result<()> {
        let _op = session.begin(SessionState::Subscribing)?;
        info!(session = %session.id(), topics = ?topics, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, session: &Session, topics: &[String]) -> Result<()> {
        let _op = session.begin(SessionState::Unsubscribing)?;
        info!(session = %session.id(), topics = ?topics, "unsubscribed");
        Ok(())
    }

    async fn disconnect(&self, session: &Session) -> Result<()> {
        let previous = session.terminate();
        info!(session = %session.id(), from = ?previous, "disconnected");
        Ok(())
    }
}
