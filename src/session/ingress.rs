//! Shared ingress path
//!
//! Every protocol adapter runs the same publish pipeline: parse the wire
//! topic, build the envelope, authorize the bearer token against the policy
//! service, stamp the resolved principal and hand the envelope to the bus.
//! `Ingress` owns that pipeline; protocol handlers only add their lifecycle
//! hooks around it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::authz::{self, Action, AuthzClient, AuthzRequest, EntityType};
use crate::broker::{Message, Protocol, Publisher, topic};
use crate::session::state::Session;
use crate::utils::{Error, Result};

#[derive(Clone)]
pub struct Ingress {
    protocol: Protocol,
    authz: Arc<dyn AuthzClient>,
    publisher: Arc<dyn Publisher>,
    publish_timeout: Duration,
}

impl Ingress {
    pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(
        protocol: Protocol,
        authz: Arc<dyn AuthzClient>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            protocol,
            authz,
            publisher,
            publish_timeout: Self::DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Validates that a credential is present and moves the session to
    /// `Connecting`. A session without a credential is terminated.
    pub fn auth_connect(&self, session: &Session) -> Result<()> {
        session.begin_connect()?;
        if let Err(e) = session.token() {
            session.terminate();
            warn!(session = %session.id(), protocol = %self.protocol, "connect without credential");
            return Err(e);
        }
        Ok(())
    }

    /// Asks the policy service whether the session's principal may perform
    /// `action` on `channel` and returns the resolved principal ID.
    pub async fn authorize(
        &self,
        session: &Session,
        channel: &str,
        action: Action,
    ) -> Result<String> {
        let req = AuthzRequest {
            subject: session.token()?.to_string(),
            object: channel.to_string(),
            action,
            entity_type: EntityType::Thing,
        };
        let id = authz::authorize(self.authz.as_ref(), &req, session.cancellation()).await?;
        if id.is_empty() {
            return Err(Error::GatewayUnavailable(
                "policy service granted access without a principal".to_string(),
            ));
        }
        Ok(id)
    }

    /// Authorizes `action` on the channel addressed by a wire topic.
    pub async fn authorize_topic(
        &self,
        session: &Session,
        wire_topic: &str,
        action: Action,
    ) -> Result<String> {
        let (channel, _) = topic::parse_topic(wire_topic)?;
        self.authorize(session, &channel, action).await
    }

    /// Normalizes a raw publish and forwards it to the bus.
    ///
    /// Returns the forwarded message. Nothing reaches the bus unless the
    /// policy service granted access and resolved a principal.
    pub async fn publish(
        &self,
        session: &Session,
        wire_topic: &str,
        payload: Vec<u8>,
    ) -> Result<Message> {
        let (channel, subtopic) = topic::parse_topic(wire_topic).map_err(Error::publish_failed)?;
        let mut msg = Message::new(self.protocol, &channel, &subtopic, payload);

        msg.publisher = self.authorize(session, &channel, Action::Publish).await?;

        let forwarded = tokio::select! {
            biased;
            _ = session.cancellation().cancelled() => {
                Err(Error::Bus("publish cancelled".to_string()))
            }
            res = tokio::time::timeout(self.publish_timeout, self.publisher.publish(&msg.channel, &msg)) => {
                res.unwrap_or_else(|_| Err(Error::Bus("publish timed out".to_string())))
            }
        };
        forwarded.map_err(Error::publish_failed)?;

        debug!(
            session = %session.id(),
            protocol = %self.protocol,
            channel = %msg.channel,
            subtopic = %msg.subtopic,
            publisher = %msg.publisher,
            "forwarded message"
        );
        Ok(msg)
    }
}
