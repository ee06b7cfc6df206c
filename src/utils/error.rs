//! The `error` module defines the error taxonomy shared by every part of the
//! adapter core.
//!
//! Parsing and authorization failures reject a single message and leave the
//! session alive; infrastructure failures (`GatewayUnavailable`,
//! `PublishFailed`) are surfaced to the transport, which decides whether to
//! retry. Nothing in this crate retries on its own.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed topic")]
    MalformedTopic,

    #[error("malformed subtopic")]
    MalformedSubtopic,

    #[error("missing credential")]
    MissingCredential,

    #[error("session is not connected")]
    NotConnected,

    #[error("authorization gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("failed to publish: {0}")]
    PublishFailed(#[source] Box<Error>),

    #[error("route not found")]
    RouteNotFound,

    #[error("device is not connected to the channel")]
    NotConnectedRoute,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("failed to decode event: {0}")]
    EventDecode(String),

    #[error("message bus: {0}")]
    Bus(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("route map store: {0}")]
    Store(#[from] sled::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Wraps `cause` as a publish failure.
    pub fn publish_failed(cause: Error) -> Self {
        Error::PublishFailed(Box::new(cause))
    }

    /// Returns the innermost error, looking through `PublishFailed`.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::PublishFailed(cause) => cause.root_cause(),
            other => other,
        }
    }

    /// True for failures that only reject the offending message and keep the
    /// session usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::MalformedTopic
                | Error::MalformedSubtopic
                | Error::Unauthorized
                | Error::NotConnectedRoute
                | Error::MalformedPayload(_)
        )
    }
}
