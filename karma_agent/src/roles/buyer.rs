//! Buyer (spec.md §4.8): a consumer-only role. Checks budget, publishes the
//! next missing product in its supply chain (§4.9) as a `[KK Request]`
//! task, assigns and approves whoever fulfills it, and announces demand
//! over chat. Never applies to or submits anything itself.

use anyhow::Result;
use async_trait::async_trait;
use karma_common::EvidenceKind;
use log::info;

use super::RolePlan;
use crate::runtime::RuntimeContext;
use crate::supply_chain;

pub struct BuyerPlan;

#[async_trait]
impl RolePlan for BuyerPlan {
    /// Publishes a buy task for the next product in the supply chain this
    /// agent hasn't already purchased this cycle, budget permitting.
    async fn create(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let Some(chain) = ctx.supply_chain.as_ref() else {
            return Ok(());
        };
        let root = ctx.data_dir().clone();
        let state = supply_chain::load_state(&root).await?;

        let records = ctx.store.list_escrow_records().await?;
        let purchased_today = supply_chain::today_purchases(&records);
        let Some(product) = chain.next_purchase(&state, &purchased_today) else {
            return Ok(());
        };
        let product = product.to_string();

        let ledger = ctx.store.read_ledger().await?;
        let bounty_decimal = catalog_price(ctx, &product);
        let bounty_smallest = karma_signer::to_smallest_unit(bounty_decimal, ctx.token.decimals)?;
        if !ctx.budget.can_afford(&ledger, bounty_smallest) {
            info!("{} is over its daily budget, skipping purchase of {product}", ctx.agent.name);
            return Ok(());
        }

        let required = std::collections::BTreeSet::from([required_evidence(ctx, &product)]);
        super::publish_buy_task(ctx, &product, bounty_decimal, required).await?;
        Ok(())
    }

    async fn assign(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let records = super::refresh_records(ctx).await?;
        super::assign_pending(ctx, &records).await
    }

    /// Approves any completed submission, then advances the supply-chain
    /// cursor for whichever product just settled.
    async fn approve(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let records = ctx.store.list_escrow_records().await?;
        super::approve_pending(ctx, &records).await?;

        let Some(chain) = ctx.supply_chain.as_ref() else {
            return Ok(());
        };
        let root = ctx.data_dir().clone();
        let mut state = supply_chain::load_state(&root).await?;
        let refreshed = ctx.store.list_escrow_records().await?;
        let purchased_today = supply_chain::today_purchases(&refreshed);
        if let Some(current) = chain.dependencies().get(state.step as usize) {
            if purchased_today.iter().any(|p| p == current) {
                state = chain.advance(state);
                supply_chain::save_state(&root, &state).await?;
            }
        }
        Ok(())
    }
}

fn catalog_price(ctx: &RuntimeContext, product: &str) -> f64 {
    ctx.catalog
        .iter()
        .find(|entry| entry.name == product)
        .map(|entry| entry.price_decimal)
        .unwrap_or(0.01)
}

/// The catalog carries the evidence kind a product's own seller expects to
/// deliver; a buyer asking for an upstream product it doesn't also sell
/// falls back to `JsonResponse`.
fn required_evidence(ctx: &RuntimeContext, product: &str) -> EvidenceKind {
    ctx.catalog
        .iter()
        .find(|entry| entry.name == product)
        .map(|entry| entry.evidence_kind)
        .unwrap_or(EvidenceKind::JsonResponse)
}
