//! Coordinator (spec.md §4.8): never touches escrow or the marketplace.
//! Reads whatever peers have announced on the chat channel this tick
//! (best-effort; the channel has no membership list or delivery guarantee),
//! re-nudges demand nobody has answered yet, and broadcasts its own health
//! so other coordinators can tell it's alive.

use anyhow::Result;
use async_trait::async_trait;
use karma_chat::{MarketplaceAnnouncement, PROTOCOL_CHANNEL};
use log::{info, warn};

use super::RolePlan;
use crate::runtime::RuntimeContext;

const DRAIN_BATCH: usize = 20;

pub struct CoordinatorPlan;

#[async_trait]
impl RolePlan for CoordinatorPlan {
    /// Drains a batch of chat traffic and logs a best-effort summary of
    /// what peers are offering and asking for this tick.
    async fn browse(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let Some(chat) = ctx.chat.as_mut() else {
            return Ok(());
        };

        let mut haves = 0;
        let mut unanswered_needs = Vec::new();
        for _ in 0..DRAIN_BATCH {
            let message = match chat.recv(std::time::Duration::from_millis(200)).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!("chat recv failed, continuing without chat this tick: {e}");
                    break;
                }
            };
            match MarketplaceAnnouncement::parse(&message.line) {
                MarketplaceAnnouncement::Have { .. } => haves += 1,
                MarketplaceAnnouncement::Need { product, .. } => unanswered_needs.push(product),
                MarketplaceAnnouncement::Deal { .. } | MarketplaceAnnouncement::Unknown(_) => {}
            }
        }

        info!(
            "{} observed {haves} HAVE and {} NEED announcement(s) this tick",
            ctx.agent.name,
            unanswered_needs.len()
        );

        // Best-effort nudge: the marketplace has no routing endpoint, so a
        // coordinator can only re-surface demand, not assign it.
        for product in unanswered_needs {
            let nudge = format!("STATUS: {} is watching for {product}", ctx.agent.name);
            if let Err(e) = chat.send(PROTOCOL_CHANNEL, &nudge).await {
                warn!("coordinator nudge dropped: {e}");
            }
        }
        Ok(())
    }

    /// Broadcasts this coordinator's health so peers reading the channel
    /// can tell it is still running.
    async fn create(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let Some(chat) = ctx.chat.as_ref() else {
            return Ok(());
        };
        let health = if ctx.is_degraded() { "degraded" } else { "ok" };
        let status = format!("STATUS: {} health={health}", ctx.agent.name);
        if let Err(e) = chat.send(PROTOCOL_CHANNEL, &status).await {
            warn!("coordinator health broadcast dropped: {e}");
        }
        Ok(())
    }
}
