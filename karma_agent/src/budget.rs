use chrono::{NaiveDate, Utc};
use karma_common::Address;
use karma_store::ledger::{spend_on_day, LedgerEntry};

/// Day-bounded spend gate over `ledger.jsonl` (spec.md §4.8 / Testable
/// Property 7). Refuses to authorize further spend once the configured
/// daily cap for the current UTC calendar day is reached.
pub struct BudgetTracker {
    address: Address,
    daily_cap: u64,
}

impl BudgetTracker {
    pub fn new(address: Address, daily_cap: u64) -> Self {
        Self { address, daily_cap }
    }

    pub fn daily_cap(&self) -> u64 {
        self.daily_cap
    }

    /// Spend so far today, from a freshly-read ledger.
    pub fn spent_today(&self, entries: &[LedgerEntry]) -> u64 {
        spend_on_day(entries, self.address, Utc::now().date_naive())
    }

    pub fn remaining_today(&self, entries: &[LedgerEntry]) -> u64 {
        self.daily_cap.saturating_sub(self.spent_today(entries))
    }

    /// Whether authorizing `value` more smallest-units would stay within
    /// the cap for `day`.
    pub fn can_afford(&self, entries: &[LedgerEntry], value: u64) -> bool {
        self.spent_today(entries).saturating_add(value) <= self.daily_cap
    }

    /// Non-"today" variant used by tests that pin a specific calendar
    /// date rather than relying on the wall clock.
    pub fn can_afford_on(&self, entries: &[LedgerEntry], value: u64, day: NaiveDate) -> bool {
        spend_on_day(entries, self.address, day).saturating_add(value) <= self.daily_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karma_common::PaymentAuthorization;

    fn entry(value: u64, address: Address, day: chrono::DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            issued_at: day,
            authorization: PaymentAuthorization {
                from: address,
                to: Address::from_bytes([9u8; 20]),
                value,
                valid_after: 0,
                valid_before: 1,
                nonce: [0u8; 32],
                v: 27,
                r: [0u8; 32],
                s: [0u8; 32],
            },
        }
    }

    #[test]
    fn refuses_spend_past_the_daily_cap() {
        let address = Address::from_bytes([1u8; 20]);
        let tracker = BudgetTracker::new(address, 1_000);
        let entries = vec![entry(900, address, Utc::now())];
        assert!(tracker.can_afford(&entries, 100));
        assert!(!tracker.can_afford(&entries, 101));
    }

    #[test]
    fn yesterdays_spend_does_not_count_against_today() {
        let address = Address::from_bytes([1u8; 20]);
        let tracker = BudgetTracker::new(address, 1_000);
        let yesterday = Utc::now() - chrono::Duration::days(1);
        let entries = vec![entry(999, address, yesterday)];
        assert!(tracker.can_afford(&entries, 1_000));
    }
}
