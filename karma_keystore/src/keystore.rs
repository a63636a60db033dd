use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use karma_common::Address;
use log::{info, warn};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::derivation::{derive_secret_key, DerivationError};
use crate::registry::{AgentInfo, IdentityRegistry, RegistryError};

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("no private key available: set an explicit key or a swarm mnemonic")]
    MissingSecret,
    #[error("mnemonic derivation failed: {0}")]
    InvalidMnemonic(#[from] DerivationError),
    #[error("derived key material did not produce a valid signing key")]
    DerivationFailed,
    #[error("identity registry unreachable, continuing in degraded mode: {0}")]
    RegistryUnavailable(#[from] RegistryError),
}

/// Explicit configuration for key resolution, mirroring the lookup order in
/// spec.md §4.1: explicit key first, then mnemonic-derived, in that order.
#[derive(Clone, Debug, Default)]
pub struct KeystoreConfig {
    pub explicit_private_key: Option<[u8; 32]>,
    pub mnemonic: Option<String>,
    pub derivation_index: u32,
}

/// A resolved identity: secret key material, the derived address, and
/// whatever on-chain registry id could be established.
pub struct ResolvedIdentity {
    pub signing_key: SigningKey,
    pub address: Address,
    pub registry_id: Option<u64>,
    pub degraded: bool,
}

pub fn address_from_signing_key(signing_key: &SigningKey) -> Address {
    let verifying_key = signing_key.verifying_key();
    let encoded = verifying_key.to_encoded_point(false);
    // Uncompressed point is [0x04 || X (32) || Y (32)]; Ethereum-style
    // addresses hash only the X||Y portion.
    let hash = Keccak256::digest(&encoded.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..32]);
    Address::from_bytes(bytes)
}

fn signing_key_from_secret(secret: [u8; 32]) -> Result<SigningKey, KeystoreError> {
    SigningKey::from_bytes((&secret).into()).map_err(|_| KeystoreError::DerivationFailed)
}

/// Resolves private key material per the config's lookup order. Does not
/// touch the network; registry resolution is a separate, fallible step.
pub fn load_secret(config: &KeystoreConfig) -> Result<SigningKey, KeystoreError> {
    if let Some(key_bytes) = config.explicit_private_key {
        info!("loaded explicit private key from process-scoped configuration");
        return signing_key_from_secret(key_bytes);
    }

    if let Some(mnemonic) = &config.mnemonic {
        let secret = derive_secret_key(mnemonic, config.derivation_index)?;
        info!(
            "derived private key from swarm mnemonic at index {}",
            config.derivation_index
        );
        return signing_key_from_secret(secret);
    }

    Err(KeystoreError::MissingSecret)
}

/// Attempts to resolve the on-chain registry id for `address`. Returns
/// `(registry_id, degraded)`; `degraded = true` means chain reads failed and
/// the caller should run without on-chain reputation per spec.md §4.1.
pub async fn resolve_registry_id(
    registry: &dyn IdentityRegistry,
    address: Address,
    name: &str,
    domain: &str,
) -> (Option<u64>, bool) {
    match registry.resolve_by_address(address).await {
        Ok(Some(AgentInfo { registry_id, .. })) => (Some(registry_id), false),
        Ok(None) => match registry.register_self(address, name, domain, "").await {
            Ok(registry_id) => (Some(registry_id), false),
            Err(err) => {
                warn!("registry self-registration failed, running degraded: {err}");
                (None, true)
            }
        },
        Err(err) => {
            warn!("identity registry unreachable, running degraded: {err}");
            (None, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_secret_is_an_error() {
        let config = KeystoreConfig::default();
        let err = load_secret(&config).unwrap_err();
        assert!(matches!(err, KeystoreError::MissingSecret));
    }

    #[test]
    fn explicit_key_resolves_to_stable_address() {
        let config = KeystoreConfig {
            explicit_private_key: Some([0x11u8; 32]),
            ..Default::default()
        };
        let key = load_secret(&config).unwrap();
        let addr_a = address_from_signing_key(&key);
        let addr_b = address_from_signing_key(&key);
        assert_eq!(addr_a, addr_b);
    }

    #[test]
    fn mnemonic_derivation_resolves() {
        let config = KeystoreConfig {
            mnemonic: Some(
                "test test test test test test test test test test test junk".into(),
            ),
            derivation_index: 3,
            ..Default::default()
        };
        let key = load_secret(&config).unwrap();
        let _ = address_from_signing_key(&key);
    }
}
