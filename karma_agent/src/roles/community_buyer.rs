//! Community buyer (spec.md §4.8's role list names the tag but does not
//! describe its behavior; see DESIGN.md's open-question resolution): unlike
//! [`super::buyer::BuyerPlan`], which walks a single linear supply chain,
//! this role buys on behalf of the wider community by working through
//! `Agent.desired_products` — a pool of independent wants rather than an
//! ordered dependency chain. Every entry can be requested in the same
//! cycle, budget permitting, instead of one-at-a-time gating on the
//! previous step settling.

use anyhow::Result;
use async_trait::async_trait;
use karma_common::EvidenceKind;
use log::info;

use super::RolePlan;
use crate::runtime::RuntimeContext;
use crate::supply_chain;

pub struct CommunityBuyerPlan;

#[async_trait]
impl RolePlan for CommunityBuyerPlan {
    /// Publishes a buy task for every desired product not already
    /// purchased today and not already in flight, subject to the daily
    /// budget.
    async fn create(&self, ctx: &mut RuntimeContext) -> Result<()> {
        if ctx.agent.desired_products.is_empty() {
            return Ok(());
        }

        let records = ctx.store.list_escrow_records().await?;
        let purchased_today = supply_chain::today_purchases(&records);
        let wanted: Vec<String> = ctx
            .agent
            .desired_products
            .iter()
            .filter(|product| !purchased_today.contains(product))
            .cloned()
            .collect();

        for product in wanted {
            let ledger = ctx.store.read_ledger().await?;
            let bounty_decimal = catalog_price(ctx, &product);
            let bounty_smallest = karma_signer::to_smallest_unit(bounty_decimal, ctx.token.decimals)?;
            if !ctx.budget.can_afford(&ledger, bounty_smallest) {
                info!("{} is over its daily budget, skipping community purchase of {product}", ctx.agent.name);
                continue;
            }
            let kind = ctx
                .catalog
                .iter()
                .find(|entry| entry.name == product)
                .map(|entry| entry.evidence_kind)
                .unwrap_or(EvidenceKind::JsonResponse);
            let required = std::collections::BTreeSet::from([kind]);
            super::publish_buy_task(ctx, &product, bounty_decimal, required).await?;
        }
        Ok(())
    }

    async fn assign(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let records = super::refresh_records(ctx).await?;
        super::assign_pending(ctx, &records).await
    }

    async fn approve(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let records = ctx.store.list_escrow_records().await?;
        super::approve_pending(ctx, &records).await
    }
}

fn catalog_price(ctx: &RuntimeContext, product: &str) -> f64 {
    ctx.catalog
        .iter()
        .find(|entry| entry.name == product)
        .map(|entry| entry.price_decimal)
        .unwrap_or(0.01)
}
