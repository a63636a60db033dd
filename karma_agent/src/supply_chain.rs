use std::path::Path;

use chrono::Utc;
use karma_escrow::EscrowRecord;
use karma_store::StoreError;
use serde::{Deserialize, Serialize};

/// Persisted at `supply_chain_state.json` via `karma_store::atomic`
/// (spec.md §4.9). `step` is the index of the dependency last purchased
/// within `cycle`; a consumer that has bought everything in the current
/// cycle holds `step == dependencies.len() - 1` until the next cycle
/// starts.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupplyChainState {
    pub step: u32,
    pub cycle: u32,
}

/// The ordered dependency chain a pipeline consumer buys through, e.g.
/// `raw_logs -> skill_profile -> voice_profile -> soul_bundle`
/// (spec.md §4.9, Testable Property 6).
pub struct SupplyChain {
    dependencies: Vec<String>,
}

impl SupplyChain {
    pub fn new(dependencies: Vec<String>) -> Self {
        Self { dependencies }
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// The minimum-prefix product not yet purchased today, or `None` if
    /// the whole chain has been completed for the current cycle. Pure:
    /// takes the day's already-recorded purchases and the persisted
    /// state, returns what to buy next without mutating either.
    pub fn next_purchase<'a>(
        &'a self,
        state: &SupplyChainState,
        today_purchases: &[String],
    ) -> Option<&'a str> {
        self.dependencies
            .iter()
            .enumerate()
            .skip(state.step as usize)
            .find(|(_, dep)| !today_purchases.iter().any(|bought| bought == *dep))
            .map(|(_, dep)| dep.as_str())
    }

    /// Advances `state` after `dependencies[state.step]` reaches
    /// `SETTLED`. Rolls the cycle over once every dependency has been
    /// bought, per spec.md §4.9's "advances only when the previous step
    /// reaches SETTLED".
    pub fn advance(&self, state: SupplyChainState) -> SupplyChainState {
        let next_step = state.step + 1;
        if next_step as usize >= self.dependencies.len() {
            SupplyChainState {
                step: 0,
                cycle: state.cycle + 1,
            }
        } else {
            SupplyChainState {
                step: next_step,
                cycle: state.cycle,
            }
        }
    }
}

const STATE_FILE_NAME: &str = "supply_chain_state.json";

/// Loads `<data-dir>/supply_chain_state.json`, defaulting to a fresh
/// `{step: 0, cycle: 0}` when absent, matching the rest of `karma_store`'s
/// load-or-default-on-corrupt convention.
pub async fn load_state(root: &Path) -> Result<SupplyChainState, StoreError> {
    let path = root.join(STATE_FILE_NAME);
    if !path.exists() {
        return Ok(SupplyChainState::default());
    }
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| StoreError::io(path.display().to_string(), e))?;
    match serde_json::from_slice(&bytes) {
        Ok(state) => Ok(state),
        Err(_) => Ok(SupplyChainState::default()),
    }
}

/// Persists the supply-chain cursor atomically, via the same
/// write-to-temp-then-rename helper `karma_store` uses for every other
/// file (spec.md §4.9/§4.7).
pub async fn save_state(root: &Path, state: &SupplyChainState) -> Result<(), StoreError> {
    karma_store::atomic::write_json(&root.join(STATE_FILE_NAME), state).await
}

/// Which dependencies were already settled today, derived from the
/// escrow records this consumer holds: a record counts as "purchased
/// today" when it reached `SETTLED` on the current UTC calendar date and
/// carries the product name it was created for (spec.md §4.9).
pub fn today_purchases(records: &[EscrowRecord]) -> Vec<String> {
    let today = Utc::now().date_naive();
    records
        .iter()
        .filter_map(|record| {
            let product = record.product.clone()?;
            let settled_today = record
                .history
                .iter()
                .any(|entry| entry.to == karma_common::TaskState::Settled && entry.at.date_naive() == today);
            settled_today.then_some(product)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> SupplyChain {
        SupplyChain::new(vec![
            "raw_logs".into(),
            "skill_profile".into(),
            "voice_profile".into(),
            "soul_bundle".into(),
        ])
    }

    #[test]
    fn kth_purchase_is_always_dependency_k() {
        let chain = chain();
        let mut state = SupplyChainState::default();
        for (index, expected) in chain.dependencies().to_vec().iter().enumerate() {
            let next = chain.next_purchase(&state, &[]).unwrap();
            assert_eq!(next, expected);
            assert_eq!(state.step as usize, index);
            state = chain.advance(state);
        }
        assert_eq!(state, SupplyChainState { step: 0, cycle: 1 });
    }

    #[test]
    fn never_rebuys_within_the_same_cycle() {
        let chain = chain();
        let state = SupplyChainState { step: 1, cycle: 0 };
        let today_purchases = vec!["skill_profile".to_string()];
        let next = chain.next_purchase(&state, &today_purchases).unwrap();
        assert_eq!(next, "voice_profile");
    }

    #[test]
    fn completed_cycle_with_nothing_left_is_none() {
        let chain = chain();
        let state = SupplyChainState { step: 3, cycle: 0 };
        let today_purchases = vec!["soul_bundle".to_string()];
        assert!(chain.next_purchase(&state, &today_purchases).is_none());
    }

    #[test]
    fn five_heartbeats_over_four_dependencies_completes_one_cycle_with_one_left_over() {
        let chain = chain();
        let mut state = SupplyChainState::default();
        let mut purchases_today: Vec<String> = Vec::new();
        let mut completed = Vec::new();
        for _ in 0..5 {
            if let Some(next) = chain.next_purchase(&state, &purchases_today) {
                completed.push(next.to_string());
                purchases_today.push(next.to_string());
                state = chain.advance(state);
            }
        }
        assert_eq!(
            completed,
            vec!["raw_logs", "skill_profile", "voice_profile", "soul_bundle"]
        );
        assert_eq!(state, SupplyChainState { step: 0, cycle: 1 });
    }
}
