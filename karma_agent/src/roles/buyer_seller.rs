//! Buyer-seller (spec.md §4.8): buys the upstream product in its supply
//! chain, then sells whatever that purchase produces. Composes
//! [`buyer::BuyerPlan`] and [`seller::SellerPlan`] step by step rather than
//! duplicating either's logic — each half only ever touches its own side of
//! the escrow records (buyer-side: `publisher_address == ctx.address()`;
//! seller-side: records this agent applied to), so running both in the same
//! tick is safe.

use anyhow::Result;
use async_trait::async_trait;

use super::{buyer::BuyerPlan, seller::SellerPlan, RolePlan};
use crate::runtime::RuntimeContext;

pub struct BuyerSellerPlan;

#[async_trait]
impl RolePlan for BuyerSellerPlan {
    async fn browse(&self, ctx: &mut RuntimeContext) -> Result<()> {
        SellerPlan.browse(ctx).await
    }

    async fn create(&self, ctx: &mut RuntimeContext) -> Result<()> {
        BuyerPlan.create(ctx).await?;
        SellerPlan.create(ctx).await
    }

    async fn apply(&self, ctx: &mut RuntimeContext) -> Result<()> {
        SellerPlan.apply(ctx).await
    }

    async fn assign(&self, ctx: &mut RuntimeContext) -> Result<()> {
        BuyerPlan.assign(ctx).await
    }

    async fn submit(&self, ctx: &mut RuntimeContext) -> Result<()> {
        SellerPlan.submit(ctx).await
    }

    async fn approve(&self, ctx: &mut RuntimeContext) -> Result<()> {
        BuyerPlan.approve(ctx).await
    }
}
