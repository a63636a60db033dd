use std::collections::HashSet;

use chrono::{DateTime, Utc};
use karma_common::{Address, PaymentAuthorization};
use karma_signer::NonceLedger;
use serde::{Deserialize, Serialize};

/// One line of `ledger.jsonl`: the authorization plus the wall-clock time
/// it was issued, needed for day-bounded budget accounting (spec.md §4.8)
/// beyond what `PaymentAuthorization` alone (validAfter/validBefore) gives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub issued_at: DateTime<Utc>,
    pub authorization: PaymentAuthorization,
}

/// An in-memory snapshot of every `(from, nonce)` pair seen in
/// `ledger.jsonl`, built once at startup and consulted by
/// `karma_signer::verify_authorization`'s anti-replay check.
pub struct NonceIndex {
    seen: HashSet<(Address, [u8; 32])>,
}

impl NonceIndex {
    pub fn from_entries(entries: &[LedgerEntry]) -> Self {
        Self {
            seen: entries
                .iter()
                .map(|e| (e.authorization.from, e.authorization.nonce))
                .collect(),
        }
    }

    pub fn record(&mut self, from: Address, nonce: [u8; 32]) {
        self.seen.insert((from, nonce));
    }
}

impl NonceLedger for NonceIndex {
    fn has_seen(&self, from: Address, nonce: &[u8; 32]) -> bool {
        self.seen.contains(&(from, *nonce))
    }
}

/// Sums `value` across every entry whose `authorization.from == address`
/// and whose `issued_at` falls on `day` (UTC calendar date), for the daily
/// budget gate in spec.md §4.8.
pub fn spend_on_day(entries: &[LedgerEntry], address: Address, day: chrono::NaiveDate) -> u64 {
    entries
        .iter()
        .filter(|e| e.authorization.from == address && e.issued_at.date_naive() == day)
        .map(|e| e.authorization.value)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(address: Address, value: u64, nonce: [u8; 32], at: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            issued_at: at,
            authorization: PaymentAuthorization {
                from: address,
                to: Address::from_bytes([9u8; 20]),
                value,
                valid_after: 0,
                valid_before: 1,
                nonce,
                v: 27,
                r: [0u8; 32],
                s: [0u8; 32],
            },
        }
    }

    #[test]
    fn nonce_index_detects_replays() {
        let address = Address::from_bytes([1u8; 20]);
        let entries = vec![entry(address, 1, [1u8; 32], Utc::now())];
        let index = NonceIndex::from_entries(&entries);
        assert!(index.has_seen(address, &[1u8; 32]));
        assert!(!index.has_seen(address, &[2u8; 32]));
    }

    #[test]
    fn spend_on_day_sums_only_matching_address_and_day() {
        let address = Address::from_bytes([1u8; 20]);
        let other = Address::from_bytes([2u8; 20]);
        let today = Utc::now();
        let yesterday = today - Duration::days(1);
        let entries = vec![
            entry(address, 100, [1u8; 32], today),
            entry(address, 50, [2u8; 32], today),
            entry(address, 999, [3u8; 32], yesterday),
            entry(other, 999, [4u8; 32], today),
        ];
        let total = spend_on_day(&entries, address, today.date_naive());
        assert_eq!(total, 150);
    }
}
