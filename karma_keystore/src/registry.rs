use async_trait::async_trait;
use karma_common::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("identity registry unreachable: {reason}")]
    Unavailable { reason: String },
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned malformed response: {0}")]
    Malformed(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentInfo {
    pub registry_id: u64,
    pub name: String,
    pub domain: String,
}

/// Resolves plaintext agent identity to the on-chain identity registry and
/// back, matching spec.md §4.1's `newAgent` / `resolveByAddress` contract.
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    async fn register_self(
        &self,
        address: Address,
        name: &str,
        domain: &str,
        metadata: &str,
    ) -> Result<u64, RegistryError>;

    async fn resolve_by_address(&self, address: Address) -> Result<Option<AgentInfo>, RegistryError>;
}

/// Queries a chain RPC endpoint exposing the identity registry contract over
/// a JSON-RPC-over-HTTP bridge.
pub struct HttpIdentityRegistry {
    client: reqwest::Client,
    rpc_url: url::Url,
}

impl HttpIdentityRegistry {
    pub fn new(rpc_url: url::Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url,
        }
    }
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    address: String,
    name: &'a str,
    domain: &'a str,
    metadata: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    registry_id: u64,
}

#[derive(Deserialize)]
struct ResolveResponse {
    agent: Option<AgentInfo>,
}

#[async_trait]
impl IdentityRegistry for HttpIdentityRegistry {
    async fn register_self(
        &self,
        address: Address,
        name: &str,
        domain: &str,
        metadata: &str,
    ) -> Result<u64, RegistryError> {
        let body = RegisterRequest {
            address: address.to_string(),
            name,
            domain,
            metadata,
        };
        let response = self
            .client
            .post(self.rpc_url.join("identity/register").map_err(|e| {
                RegistryError::Malformed(format!("bad registry url: {e}"))
            })?)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RegistryError::Unavailable {
                reason: format!("registry returned {}", response.status()),
            });
        }
        let parsed: RegisterResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Malformed(e.to_string()))?;
        Ok(parsed.registry_id)
    }

    async fn resolve_by_address(&self, address: Address) -> Result<Option<AgentInfo>, RegistryError> {
        let url = self
            .rpc_url
            .join(&format!("identity/resolve/{address}"))
            .map_err(|e| RegistryError::Malformed(format!("bad registry url: {e}")))?;
        let response = self.client.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RegistryError::Unavailable {
                reason: format!("registry returned {}", response.status()),
            });
        }
        let parsed: ResolveResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Malformed(e.to_string()))?;
        Ok(parsed.agent)
    }
}

/// Used when no chain RPC endpoint is configured. Every call fails with
/// `Unavailable`, driving the keystore's degraded-mode fallback in spec.md
/// §4.1 ("the agent may run in degraded mode").
pub struct NullIdentityRegistry;

#[async_trait]
impl IdentityRegistry for NullIdentityRegistry {
    async fn register_self(
        &self,
        _address: Address,
        _name: &str,
        _domain: &str,
        _metadata: &str,
    ) -> Result<u64, RegistryError> {
        Err(RegistryError::Unavailable {
            reason: "no chain RPC URL configured".into(),
        })
    }

    async fn resolve_by_address(&self, _address: Address) -> Result<Option<AgentInfo>, RegistryError> {
        Err(RegistryError::Unavailable {
            reason: "no chain RPC URL configured".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_registry_is_always_unavailable() {
        let registry = NullIdentityRegistry;
        let err = registry
            .resolve_by_address(Address::from_bytes([1u8; 20]))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable { .. }));
    }
}
