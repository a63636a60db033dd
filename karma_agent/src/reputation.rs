//! Runtime wiring for C5 (spec.md §4.5): turns the agent's own local
//! evidence (completed/rejected escrow history with each counterparty)
//! into the `ReputationLayer` inputs `karma_reputation::compute_composite`
//! needs, and caches the result on a cadence independent of the heartbeat
//! ("snapshots are refreshed on a cadence independent of the heartbeat").

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use karma_common::{Address, ReputationLayer, ReputationSnapshot, ReputationTier, TaskState};
use karma_escrow::EscrowRecord;
use karma_reputation::{compute_composite, layer_from_sample};
use tokio::time::Instant;

/// Minimum sample size before the transactional layer is treated as fully
/// confident, per `karma_reputation::layer_from_sample`'s convention.
const MAX_CONFIDENCE_SAMPLES: u32 = 10;

/// Per-agent read-only reputation snapshots (spec.md §4.5: "read-only
/// snapshot per agent"), refreshed from local escrow history on a fixed
/// cadence rather than on every tick.
pub struct ReputationCache {
    refresh_interval: Duration,
    last_refresh: Option<Instant>,
    snapshots: HashMap<Address, ReputationSnapshot>,
}

impl ReputationCache {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            refresh_interval,
            last_refresh: None,
            snapshots: HashMap::new(),
        }
    }

    fn due(&self) -> bool {
        match self.last_refresh {
            None => true,
            Some(last) => last.elapsed() >= self.refresh_interval,
        }
    }

    /// Recomputes every counterparty's composite reputation from the
    /// agent's own escrow history, if the refresh cadence has elapsed.
    /// On-chain and off-chain layers are left unavailable: this core has
    /// no reputation-registry client or chat-rating aggregator wired in,
    /// so only the transactional layer (marketplace completion rate,
    /// spec.md §4.5's table) ever carries a real sample.
    pub fn refresh_if_due(&mut self, records: &[EscrowRecord]) {
        if !self.due() {
            return;
        }
        self.last_refresh = Some(Instant::now());

        let mut completed: HashMap<Address, u32> = HashMap::new();
        let mut total: HashMap<Address, u32> = HashMap::new();
        for record in records {
            let counterparty = match record.assignee_address {
                Some(addr) => addr,
                None => continue,
            };
            if !record.state.is_terminal() || record.state == TaskState::Expired {
                continue;
            }
            *total.entry(counterparty).or_insert(0) += 1;
            if record.state == TaskState::Settled {
                *completed.entry(counterparty).or_insert(0) += 1;
            }
        }

        self.snapshots.clear();
        for (address, sample_size) in &total {
            let completed_count = completed.get(address).copied().unwrap_or(0);
            let completion_rate = (completed_count as f64 / *sample_size as f64) * 100.0;
            let transactional = layer_from_sample(completion_rate, *sample_size, MAX_CONFIDENCE_SAMPLES);
            let neutral_unavailable = ReputationLayer {
                score: 50.0,
                confidence: 0.0,
                available: false,
            };
            let (composite, tier) =
                compute_composite(&[neutral_unavailable, neutral_unavailable, transactional]);
            self.snapshots.insert(
                *address,
                ReputationSnapshot {
                    agent_address: *address,
                    on_chain: neutral_unavailable,
                    off_chain: neutral_unavailable,
                    transactional,
                    composite,
                    tier,
                    refreshed_at: Utc::now(),
                },
            );
        }
    }

    /// Reads a cached snapshot, falling back to the neutral composite
    /// (spec.md §4.5: "if none are available, the composite is 50 with
    /// confidence 0") for an address never seen before.
    pub fn get(&self, address: Address) -> ReputationSnapshot {
        self.snapshots.get(&address).cloned().unwrap_or_else(|| {
            let neutral = ReputationLayer {
                score: 50.0,
                confidence: 0.0,
                available: false,
            };
            ReputationSnapshot {
                agent_address: address,
                on_chain: neutral,
                off_chain: neutral,
                transactional: neutral,
                composite: 50.0,
                tier: ReputationTier::Mid,
                refreshed_at: Utc::now(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karma_common::Address;
    use karma_escrow::EscrowRecord;
    use uuid::Uuid;

    fn settled_record(publisher: Address, assignee: Address) -> EscrowRecord {
        let mut record = EscrowRecord::new(Uuid::new_v4(), publisher);
        record.assignee_address = Some(assignee);
        record.state = TaskState::Settled;
        record
    }

    #[test]
    fn never_seen_counterparty_is_neutral() {
        let cache = ReputationCache::new(Duration::from_secs(60));
        let snapshot = cache.get(Address::from_bytes([9u8; 20]));
        assert_eq!(snapshot.composite, 50.0);
        assert_eq!(snapshot.tier, ReputationTier::Mid);
    }

    #[test]
    fn settled_history_raises_the_transactional_layer() {
        let mut cache = ReputationCache::new(Duration::from_secs(0));
        let publisher = Address::from_bytes([1u8; 20]);
        let seller = Address::from_bytes([2u8; 20]);
        let records = vec![
            settled_record(publisher, seller),
            settled_record(publisher, seller),
        ];
        cache.refresh_if_due(&records);
        let snapshot = cache.get(seller);
        assert!(snapshot.transactional.available);
        assert_eq!(snapshot.transactional.score, 100.0);
    }
}
