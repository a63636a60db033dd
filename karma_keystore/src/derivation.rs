//! BIP-39 mnemonic to BIP-32 child key derivation along `m/44'/60'/0'/0/i`.

use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::PrimeField;
use k256::{FieldBytes, Scalar, SecretKey};
use sha2::Sha512;
use thiserror::Error;

type HmacSha512 = Hmac<Sha512>;

const HARDENED_OFFSET: u32 = 0x8000_0000;

#[derive(Debug, Error)]
pub enum DerivationError {
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(#[from] bip39::Error),
    #[error("derived key material is not a valid secp256k1 scalar")]
    InvalidKeyMaterial,
}

struct ExtendedKey {
    key: [u8; 32],
    chain_code: [u8; 32],
}

fn master_key_from_seed(seed: &[u8]) -> ExtendedKey {
    let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed").expect("hmac accepts any key length");
    mac.update(seed);
    let result = mac.finalize().into_bytes();
    let mut key = [0u8; 32];
    let mut chain_code = [0u8; 32];
    key.copy_from_slice(&result[0..32]);
    chain_code.copy_from_slice(&result[32..64]);
    ExtendedKey { key, chain_code }
}

fn bytes_to_scalar(bytes: &[u8; 32]) -> Result<Scalar, DerivationError> {
    let repr = FieldBytes::clone_from_slice(bytes);
    Option::from(Scalar::from_repr(repr)).ok_or(DerivationError::InvalidKeyMaterial)
}

fn scalar_to_bytes(scalar: &Scalar) -> [u8; 32] {
    let repr = scalar.to_repr();
    let mut out = [0u8; 32];
    out.copy_from_slice(&repr);
    out
}

fn compressed_public_key(key: &[u8; 32]) -> Result<[u8; 33], DerivationError> {
    let secret =
        SecretKey::from_slice(key).map_err(|_| DerivationError::InvalidKeyMaterial)?;
    let point = secret.public_key().to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(point.as_bytes());
    Ok(out)
}

fn derive_child(parent: &ExtendedKey, index: u32) -> Result<ExtendedKey, DerivationError> {
    let hardened = index >= HARDENED_OFFSET;
    let mut mac = HmacSha512::new_from_slice(&parent.chain_code)
        .expect("hmac accepts any key length");
    if hardened {
        mac.update(&[0u8]);
        mac.update(&parent.key);
    } else {
        mac.update(&compressed_public_key(&parent.key)?);
    }
    mac.update(&index.to_be_bytes());
    let result = mac.finalize().into_bytes();

    let mut il = [0u8; 32];
    let mut child_chain_code = [0u8; 32];
    il.copy_from_slice(&result[0..32]);
    child_chain_code.copy_from_slice(&result[32..64]);

    let child_scalar = bytes_to_scalar(&il)? + bytes_to_scalar(&parent.key)?;
    Ok(ExtendedKey {
        key: scalar_to_bytes(&child_scalar),
        chain_code: child_chain_code,
    })
}

/// Derive the secp256k1 secret key at `m/44'/60'/0'/0/index` from a BIP-39
/// mnemonic phrase, matching the shared-seed convention of spec.md §4.1.
pub fn derive_secret_key(mnemonic_phrase: &str, index: u32) -> Result<[u8; 32], DerivationError> {
    let mnemonic = bip39::Mnemonic::parse_normalized(mnemonic_phrase)?;
    let seed = mnemonic.to_seed("");

    let master = master_key_from_seed(&seed);
    let path = [
        44 | HARDENED_OFFSET,
        60 | HARDENED_OFFSET,
        0 | HARDENED_OFFSET,
        0,
        index,
    ];

    let mut current = master;
    for segment in path {
        current = derive_child(&current, segment)?;
    }
    Ok(current.key)
}
