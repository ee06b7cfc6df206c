//! Session representation
//!
//! `Session` models one transport connection (or one HTTP request). It holds
//! the raw credential presented by the client, the derived bearer token and
//! the lifecycle state:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> {Publishing | Subscribing | Unsubscribing}* -> Disconnected
//! ```
//!
//! Once terminated a session never leaves `Disconnected`, so an operation
//! finishing after `Disconnect` cannot bring it back.

use std::sync::{Mutex, OnceLock, PoisonError};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::utils::{Error, Result};

/// Principal-type prefixes a client may put in front of its token.
const TOKEN_PREFIXES: [&str; 3] = ["Thing ", "Client ", "Bearer "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Publishing,
    Subscribing,
    Unsubscribing,
}

impl SessionState {
    fn is_operation(self) -> bool {
        matches!(
            self,
            SessionState::Publishing | SessionState::Subscribing | SessionState::Unsubscribing
        )
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    terminated: bool,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    credential: String,
    token: OnceLock<String>,
    lifecycle: Mutex<Lifecycle>,
    cancel: CancellationToken,
}

/// Strips a known principal-type prefix, or returns the credential verbatim.
pub fn bearer_token(credential: &str) -> &str {
    TOKEN_PREFIXES
        .iter()
        .find_map(|prefix| credential.strip_prefix(prefix))
        .unwrap_or(credential)
}

impl Session {
    pub fn new(id: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            credential: credential.into(),
            token: OnceLock::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Disconnected,
                terminated: false,
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// A session with a generated `client-<uuid>` identifier.
    pub fn with_credential(credential: impl Into<String>) -> Self {
        Self::new(format!("client-{}", Uuid::new_v4()), credential)
    }

    /// Ties in-flight calls of this session to `cancel`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// Bearer token derived from the credential, cached after the first call.
    /// A credential that is only a principal-type prefix counts as missing.
    pub fn token(&self) -> Result<&str> {
        let token = self
            .token
            .get_or_init(|| bearer_token(&self.credential).trim().to_string());
        if token.is_empty() {
            return Err(Error::MissingCredential);
        }
        Ok(token)
    }

    pub(crate) fn begin_connect(&self) -> Result<()> {
        let mut lc = self.lock();
        if lc.terminated {
            return Err(Error::NotConnected);
        }
        if lc.state == SessionState::Disconnected {
            lc.state = SessionState::Connecting;
        }
        Ok(())
    }

    pub(crate) fn mark_connected(&self) -> Result<()> {
        let mut lc = self.lock();
        if lc.terminated || lc.state == SessionState::Disconnected {
            return Err(Error::NotConnected);
        }
        if lc.state == SessionState::Connecting {
            lc.state = SessionState::Connected;
        }
        Ok(())
    }

    /// Fails unless the session has passed `auth_connect` and is still open.
    pub(crate) fn ensure_active(&self) -> Result<()> {
        let lc = self.lock();
        if lc.terminated || lc.state == SessionState::Disconnected {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Enters an operation state. The returned guard moves the session back
    /// to `Connected` when dropped, unless it was terminated meanwhile.
    pub(crate) fn begin(&self, op: SessionState) -> Result<Operation<'_>> {
        debug_assert!(op.is_operation());
        let mut lc = self.lock();
        if lc.terminated || lc.state == SessionState::Disconnected {
            return Err(Error::NotConnected);
        }
        lc.state = op;
        Ok(Operation { session: self })
    }

    /// Moves to `Disconnected` for good and returns the previous state.
    pub(crate) fn terminate(&self) -> SessionState {
        let mut lc = self.lock();
        let previous = lc.state;
        lc.state = SessionState::Disconnected;
        lc.terminated = true;
        previous
    }

    fn finish(&self) {
        let mut lc = self.lock();
        if !lc.terminated && lc.state.is_operation() {
            lc.state = SessionState::Connected;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[must_use]
pub(crate) struct Operation<'a> {
    session: &'a Session,
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        self.session.finish();
    }
}
