use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Action, AuthzClient, AuthzRequest, AuthzResponse};
use crate::utils::{Error, Result};

/// In-memory policy table used by tests across the crate.
#[derive(Default)]
pub(crate) struct MockAuthz {
    grants: Mutex<HashMap<(String, String, Action), String>>,
    unavailable: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<AuthzRequest>>,
}

impl MockAuthz {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub(crate) fn grant(self, token: &str, channel: &str, action: Action, id: &str) -> Self {
        self.grants.lock().unwrap().insert(
            (token.to_string(), channel.to_string(), action),
            id.to_string(),
        );
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<AuthzRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl AuthzClient for MockAuthz {
    async fn authorize(&self, req: &AuthzRequest) -> Result<AuthzResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable {
            return Err(Error::GatewayUnavailable("connection refused".to_string()));
        }

        let key = (req.subject.clone(), req.object.clone(), req.action);
        Ok(match self.grants.lock().unwrap().get(&key) {
            Some(id) => AuthzResponse {
                authorized: true,
                id: id.clone(),
            },
            None => AuthzResponse::default(),
        })
    }
}
