//! The `authz` module is the client side of the central policy/identity
//! service.
//!
//! A request asks whether the principal behind an opaque credential may
//! perform an action on a channel; a granted response carries the canonical
//! principal ID. The core never caches decisions. Wrap `AuthzClient` in a
//! decorator if latency matters more than freshness.
//!
//! Infrastructure failures and denials are both non-publishable but stay
//! distinguishable: a failed call is `Error::GatewayUnavailable`, a denial is
//! `Error::Unauthorized`.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::utils::{Error, Result};

pub use http::HttpAuthzClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Publish,
    Subscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Thing,
    Client,
    Group,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzRequest {
    /// Bearer token of the caller.
    pub subject: String,
    /// Channel ID.
    pub object: String,
    pub action: Action,
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzResponse {
    pub authorized: bool,
    /// Resolved principal; only meaningful when `authorized` is true.
    #[serde(default)]
    pub id: String,
}

/// Synchronous request/response contract with the policy service.
///
/// Implementations return `Ok` for both grants and denials and reserve
/// `Err(Error::GatewayUnavailable)` for transport failures.
#[async_trait]
pub trait AuthzClient: Send + Sync {
    async fn authorize(&self, req: &AuthzRequest) -> Result<AuthzResponse>;
}

/// Runs one authorization call and returns the resolved principal ID.
///
/// Cancelling `cancel` while the call is in flight fails the check with
/// `GatewayUnavailable`; the check is never skipped.
pub async fn authorize(
    client: &dyn AuthzClient,
    req: &AuthzRequest,
    cancel: &CancellationToken,
) -> Result<String> {
    let res = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(Error::GatewayUnavailable("authorization cancelled".to_string()));
        }
        res = client.authorize(req) => res,
    };

    let res = match res {
        Ok(res) => res,
        Err(Error::GatewayUnavailable(reason)) => return Err(Error::GatewayUnavailable(reason)),
        Err(other) => return Err(Error::GatewayUnavailable(other.to_string())),
    };

    if !res.authorized {
        return Err(Error::Unauthorized);
    }
    Ok(res.id)
}

#[cfg(test)]
pub(crate) mod mock;
