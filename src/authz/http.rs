//! JSON-over-HTTP client for the policy service.
//!
//! The request body is the serialized `AuthzRequest`; the service answers
//! with `{"authorized": bool, "id": "<principal>"}`. Every failure on the way
//! (connect, timeout, non-2xx status, undecodable body) maps to
//! `GatewayUnavailable`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{AuthzClient, AuthzRequest, AuthzResponse};
use crate::utils::{Error, Result};

#[derive(Debug, Clone)]
pub struct HttpAuthzClient {
    client: reqwest::Client,
    url: String,
}

impl HttpAuthzClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(unavailable)?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub(super) fn unavailable(err: reqwest::Error) -> Error {
    Error::GatewayUnavailable(err.to_string())
}

#[async_trait]
impl AuthzClient for HttpAuthzClient {
    async fn authorize(&self, req: &AuthzRequest) -> Result<AuthzResponse> {
        let response = self
            .client
            .post(&self.url)
            .json(req)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!(object = %req.object, action = ?req.action, error = %e, "authorization call failed");
                unavailable(e)
            })?;

        response.json::<AuthzResponse>().await.map_err(unavailable)
    }
}
