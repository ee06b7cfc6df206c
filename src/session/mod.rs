//! The `session` module is the protocol-independent side of an adapter.
//!
//! A transport creates a `Session` per connection (or per HTTP request) and
//! drives it through a `Handler`:
//!
//! 1. `auth_connect` checks that a credential is present.
//! 2. `connect` marks the session usable.
//! 3. `auth_publish`/`publish`, `auth_subscribe`/`subscribe` and
//!    `unsubscribe` run for each client operation.
//! 4. `disconnect` terminates the session.
//!
//! Rejections of a single message (`MalformedTopic`, `Unauthorized`, ...)
//! leave the session usable; the transport decides how to report them.

pub mod http;
pub mod ingress;
pub mod persistent;
pub mod state;

use async_trait::async_trait;

use crate::broker::Message;
use crate::utils::Result;

pub use http::HttpHandler;
pub use ingress::Ingress;
pub use persistent::PersistentHandler;
pub use state::{Session, SessionState, bearer_token};

/// Lifecycle hooks a protocol adapter calls for one session.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn auth_connect(&self, session: &Session) -> Result<()>;

    async fn auth_publish(&self, session: &Session, topic: &str, payload: &[u8]) -> Result<()>;

    async fn auth_subscribe(&self, session: &Session, topics: &[String]) -> Result<()>;

    async fn connect(&self, session: &Session) -> Result<()>;

    /// Normalizes, authorizes and forwards one message. Returns the message
    /// as it was put on the bus.
    async fn publish(&self, session: &Session, topic: &str, payload: Vec<u8>) -> Result<Message>;

    async fn subscribe(&self, session: &Session, topics: &[String]) -> Result<()>;

    async fn unsubscribe(&self, session: &Session, topics: &[String]) -> Result<()>;

    async fn disconnect(&self, session: &Session) -> Result<()>;
}
