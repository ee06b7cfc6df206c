//! One-shot HTTP adapter: every request is its own session, so the only
//! hooks doing work are `auth_connect` and `publish`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::authz::AuthzClient;
use crate::broker::{Message, Protocol, Publisher};
use crate::session::Handler;
use crate::session::ingress::Ingress;
use crate::session::state::{Session, SessionState};
use crate::utils::Result;

#[derive(Clone)]
pub struct HttpHandler {
    ingress: Ingress,
}

impl HttpHandler {
    pub fn new(authz: Arc<dyn AuthzClient>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            ingress: Ingress::new(Protocol::Http, authz, publisher),
        }
    }

    pub fn from_ingress(ingress: Ingress) -> Self {
        Self { ingress }
    }
}

#[async_trait]
impl Handler for HttpHandler {
    async fn auth_connect(&self, session: &Session) -> Result<()> {
        self.ingress.auth_connect(session)
    }

    async fn auth_publish(&self, _session: &Session, _topic: &str, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn auth_subscribe(&self, _session: &Session, _topics: &[String]) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, session: &Session) -> Result<()> {
        session.mark_connected()
    }

    async fn publish(&self, session: &Session, topic: &str, payload: Vec<u8>) -> Result<Message> {
        let _op = session.begin(SessionState::Publishing)?;
        let msg = self.ingress.publish(session, topic, payload).await?;
        info!(channel = %msg.channel, publisher = %msg.publisher, "published over http");
        Ok(msg)
    }

    async fn subscribe(&self, _session: &Session, _topics: &[String]) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _session: &Session, _topics: &[String]) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self, session: &Session) -> Result<()> {
        session.terminate();
        Ok(())
    }
}
