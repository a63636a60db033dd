//! C1: resolves a plaintext agent name to private key material, a derived
//! address, and an on-chain registry id (spec.md §4.1).

mod derivation;
mod keystore;
mod registry;

pub use derivation::{derive_secret_key, DerivationError};
pub use keystore::{
    address_from_signing_key, load_secret, resolve_registry_id, KeystoreConfig, KeystoreError,
    ResolvedIdentity,
};
pub use registry::{AgentInfo, HttpIdentityRegistry, IdentityRegistry, NullIdentityRegistry, RegistryError};
