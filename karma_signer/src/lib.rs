//! C2: constructs and verifies typed "transfer-with-authorization" messages
//! that the external facilitator later executes on-chain (spec.md §4.2).

mod digest;

use chrono::Utc;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use karma_common::{Address, PaymentAuthorization};
use rand_core::{OsRng, TryRngCore};
use thiserror::Error;

pub use digest::TokenConfig;

/// Default authorization validity window: `now + 3600s` per spec.md §4.2.
pub const DEFAULT_VALID_WINDOW_SECS: u64 = 3600;

/// Default tolerance for clock skew when checking the validity window.
pub const DEFAULT_CLOCK_SKEW_TOLERANCE_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing key unavailable or signing operation failed")]
    SigningFailure,
    #[error("amount {amount} is not representable as an integer with {decimals} decimals")]
    AmountUnrepresentable { amount: f64, decimals: u8 },
    #[error("authorization window invalid: {reason}")]
    WindowInvalid { reason: String },
    #[error("signature does not recover to the claimed `from` address")]
    SignatureMismatch,
    #[error("nonce {0} has already been used by this signer")]
    NonceReused(String),
}

/// Tracks observed `(from, nonce)` pairs so the verifier side of spec.md
/// §4.2 can reject replays. Implemented by `karma_store`.
pub trait NonceLedger {
    fn has_seen(&self, from: Address, nonce: &[u8; 32]) -> bool;
}

/// Converts a decimal amount into the token's smallest-unit integer
/// representation, rejecting values that don't round-trip exactly.
pub fn to_smallest_unit(amount: f64, decimals: u8) -> Result<u64, SignerError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(SignerError::AmountUnrepresentable { amount, decimals });
    }
    let scale = 10f64.powi(decimals as i32);
    let scaled = amount * scale;
    let rounded = scaled.round();
    if (scaled - rounded).abs() > 1e-6 || rounded > u64::MAX as f64 {
        return Err(SignerError::AmountUnrepresentable { amount, decimals });
    }
    Ok(rounded as u64)
}

/// Signs a fresh transfer authorization from `signing_key`'s address to `to`
/// for `amount_decimal`, per the construction order in spec.md §4.2.
pub fn sign_authorization(
    signing_key: &SigningKey,
    token: &TokenConfig,
    to: Address,
    amount_decimal: f64,
) -> Result<PaymentAuthorization, SignerError> {
    let from = digest::address_from_signing_key(signing_key);
    let value = to_smallest_unit(amount_decimal, token.decimals)?;

    let mut nonce = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| SignerError::SigningFailure)?;

    let now = Utc::now().timestamp() as u64;
    let valid_after = 0u64;
    let valid_before = now + DEFAULT_VALID_WINDOW_SECS;

    let unsigned = digest::UnsignedAuthorization {
        from,
        to,
        value,
        valid_after,
        valid_before,
        nonce,
    };
    let prehash = digest::authorization_digest(token, &unsigned);

    let (signature, recovery_id): (Signature, RecoveryId) = signing_key
        .sign_prehash_recoverable(&prehash)
        .map_err(|_| SignerError::SigningFailure)?;

    let r_bytes = signature.r().to_bytes();
    let s_bytes = signature.s().to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&r_bytes);
    s.copy_from_slice(&s_bytes);
    let v = recovery_id.to_byte() + 27;

    Ok(PaymentAuthorization {
        from,
        to,
        value,
        valid_after,
        valid_before,
        nonce,
        v,
        r,
        s,
    })
}

/// Verifies an emitted authorization: recovers the signer, checks it matches
/// `auth.from`, checks the validity window against the current time, and
/// consults `ledger` for nonce reuse. Does not itself record the nonce.
pub fn verify_authorization(
    token: &TokenConfig,
    auth: &PaymentAuthorization,
    ledger: &dyn NonceLedger,
) -> Result<(), SignerError> {
    let unsigned = digest::UnsignedAuthorization {
        from: auth.from,
        to: auth.to,
        value: auth.value,
        valid_after: auth.valid_after,
        valid_before: auth.valid_before,
        nonce: auth.nonce,
    };
    let prehash = digest::authorization_digest(token, &unsigned);

    let recovery_id = RecoveryId::from_byte(auth.v.wrapping_sub(27))
        .ok_or(SignerError::SignatureMismatch)?;
    let signature = Signature::from_scalars(auth.r, auth.s).map_err(|_| SignerError::SignatureMismatch)?;

    let verifying_key = VerifyingKey::recover_from_prehash(&prehash, &signature, recovery_id)
        .map_err(|_| SignerError::SignatureMismatch)?;
    let recovered = digest::address_from_verifying_key(&verifying_key);
    if recovered != auth.from {
        return Err(SignerError::SignatureMismatch);
    }

    let now = Utc::now().timestamp();
    let valid_after = auth.valid_after as i64 - DEFAULT_CLOCK_SKEW_TOLERANCE_SECS;
    let valid_before = auth.valid_before as i64 + DEFAULT_CLOCK_SKEW_TOLERANCE_SECS;
    if now < valid_after || now >= valid_before {
        return Err(SignerError::WindowInvalid {
            reason: format!(
                "now={now} is outside [{}, {})",
                auth.valid_after, auth.valid_before
            ),
        });
    }

    if ledger.has_seen(auth.from, &auth.nonce) {
        return Err(SignerError::NonceReused(hex::encode(auth.nonce)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    struct MemoryLedger(RefCell<HashSet<(Address, [u8; 32])>>);

    impl MemoryLedger {
        fn new() -> Self {
            Self(RefCell::new(HashSet::new()))
        }

        fn record(&self, from: Address, nonce: [u8; 32]) {
            self.0.borrow_mut().insert((from, nonce));
        }
    }

    impl NonceLedger for MemoryLedger {
        fn has_seen(&self, from: Address, nonce: &[u8; 32]) -> bool {
            self.0.borrow().contains(&(from, *nonce))
        }
    }

    fn test_token() -> TokenConfig {
        TokenConfig {
            contract: Address::from_bytes([0xAAu8; 20]),
            chain_id: 84532,
            name: "USD Coin".into(),
            version: "2".into(),
            decimals: 6,
        }
    }

    fn test_key() -> SigningKey {
        SigningKey::from_bytes((&[0x42u8; 32]).into()).unwrap()
    }

    #[test]
    fn to_smallest_unit_scales_by_decimals() {
        assert_eq!(to_smallest_unit(1.5, 6).unwrap(), 1_500_000);
        assert_eq!(to_smallest_unit(0.01, 6).unwrap(), 10_000);
    }

    #[test]
    fn to_smallest_unit_rejects_negative() {
        assert!(to_smallest_unit(-1.0, 6).is_err());
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let key = test_key();
        let token = test_token();
        let to = Address::from_bytes([0x02u8; 20]);
        let auth = sign_authorization(&key, &token, to, 0.01).unwrap();

        let ledger = MemoryLedger::new();
        verify_authorization(&token, &auth, &ledger).unwrap();
    }

    #[test]
    fn verify_rejects_reused_nonce() {
        let key = test_key();
        let token = test_token();
        let to = Address::from_bytes([0x02u8; 20]);
        let auth = sign_authorization(&key, &token, to, 0.01).unwrap();

        let ledger = MemoryLedger::new();
        ledger.record(auth.from, auth.nonce);
        let err = verify_authorization(&token, &auth, &ledger).unwrap_err();
        assert!(matches!(err, SignerError::NonceReused(_)));
    }

    #[test]
    fn verify_rejects_tampered_value() {
        let key = test_key();
        let token = test_token();
        let to = Address::from_bytes([0x02u8; 20]);
        let mut auth = sign_authorization(&key, &token, to, 0.01).unwrap();
        auth.value += 1;

        let ledger = MemoryLedger::new();
        let err = verify_authorization(&token, &auth, &ledger).unwrap_err();
        assert!(matches!(err, SignerError::SignatureMismatch));
    }

    #[test]
    fn verify_rejects_expired_window() {
        let key = test_key();
        let token = test_token();
        let to = Address::from_bytes([0x02u8; 20]);
        let mut auth = sign_authorization(&key, &token, to, 0.01).unwrap();
        // Hand-construct an already-expired window and re-sign it so the
        // signature itself stays valid but the window check fails.
        auth.valid_before = 1;
        let unsigned = digest::UnsignedAuthorization {
            from: auth.from,
            to: auth.to,
            value: auth.value,
            valid_after: auth.valid_after,
            valid_before: auth.valid_before,
            nonce: auth.nonce,
        };
        let prehash = digest::authorization_digest(&token, &unsigned);
        let (signature, recovery_id): (Signature, RecoveryId) =
            key.sign_prehash_recoverable(&prehash).unwrap();
        auth.r.copy_from_slice(&signature.r().to_bytes());
        auth.s.copy_from_slice(&signature.s().to_bytes());
        auth.v = recovery_id.to_byte() + 27;

        let ledger = MemoryLedger::new();
        let err = verify_authorization(&token, &auth, &ledger).unwrap_err();
        assert!(matches!(err, SignerError::WindowInvalid { .. }));
    }

    #[test]
    fn distinct_signings_produce_distinct_nonces() {
        let key = test_key();
        let token = test_token();
        let to = Address::from_bytes([0x02u8; 20]);
        let a = sign_authorization(&key, &token, to, 0.01).unwrap();
        let b = sign_authorization(&key, &token, to, 0.01).unwrap();
        assert_ne!(a.nonce, b.nonce);
    }
}
