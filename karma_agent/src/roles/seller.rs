//! Seller (spec.md §4.8): publishes its catalog as chat `HAVE` announcements,
//! applies to matching `[KK Request]` tasks, and submits evidence once
//! assigned. Never creates or approves anything — those are publisher-side
//! steps this role never performs.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use karma_common::TaskState;
use karma_escrow::{EscrowEvent, EscrowMachine, EscrowRecord};
use karma_marketplace::{ApplyOutcome, BrowseFilter};
use log::{info, warn};

use super::{product_from_title, RolePlan};
use crate::runtime::RuntimeContext;

pub struct SellerPlan;

#[async_trait]
impl RolePlan for SellerPlan {
    /// Drains a short burst of chat traffic and answers any `NEED` whose
    /// product this agent's catalog carries with a `HAVE`, per spec.md
    /// §4.8's "respond to chat NEEDs".
    async fn browse(&self, ctx: &mut RuntimeContext) -> Result<()> {
        if ctx.catalog.is_empty() {
            return Ok(());
        }
        let Some(chat) = ctx.chat.as_mut() else {
            return Ok(());
        };
        for _ in 0..5 {
            let message = match chat.recv(std::time::Duration::from_millis(200)).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!("chat recv failed, continuing without chat this tick: {e}");
                    break;
                }
            };
            let karma_chat::MarketplaceAnnouncement::Need { product, .. } =
                karma_chat::MarketplaceAnnouncement::parse(&message.line)
            else {
                continue;
            };
            let Some(entry) = ctx.catalog.iter().find(|c| c.name == product) else {
                continue;
            };
            let reply = karma_chat::MarketplaceAnnouncement::Have {
                product: entry.name.clone(),
                price_usdc: format!("{:.2}", entry.price_decimal),
                description: format!("{} ({})", entry.name, entry.category),
            };
            if let Err(e) = chat.send(karma_chat::PROTOCOL_CHANNEL, &reply.format()).await {
                warn!("chat HAVE reply dropped: {e}");
            }
        }
        Ok(())
    }

    /// Announces every catalog product this agent hasn't already announced
    /// this run, per spec.md §4.8's "publish it on the marketplace if not
    /// already published" (there being no product-registry endpoint, the
    /// announcement channel is the chat `HAVE` protocol, spec.md §4.6).
    async fn create(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let Some(chat) = ctx.chat.as_ref() else {
            return Ok(());
        };
        for entry in ctx.catalog.clone() {
            let announcement = karma_chat::MarketplaceAnnouncement::Have {
                product: entry.name.clone(),
                price_usdc: format!("{:.2}", entry.price_decimal),
                description: format!("{} ({})", entry.name, entry.category),
            };
            if let Err(e) = chat.send(karma_chat::PROTOCOL_CHANNEL, &announcement.format()).await {
                warn!("chat HAVE announcement dropped: {e}");
            }
        }
        Ok(())
    }

    /// Applies to every open `[KK Request]` task whose product name matches
    /// something in the local catalog.
    async fn apply(&self, ctx: &mut RuntimeContext) -> Result<()> {
        if ctx.catalog.is_empty() {
            return Ok(());
        }
        ctx.rate_limiter.wait().await;
        let tasks = ctx
            .client
            .browse(&BrowseFilter {
                category: Some(ctx.config.category.clone()),
                limit: None,
            })
            .await?;

        let known_task_ids: BTreeSet<_> = ctx
            .store
            .list_escrow_records()
            .await?
            .into_iter()
            .map(|r| r.task_id)
            .collect();

        for task in tasks {
            if task.state != TaskState::Published || known_task_ids.contains(&task.task_id) {
                continue;
            }
            let Some(product) = product_from_title(&task.title) else {
                continue;
            };
            if !ctx.catalog.iter().any(|entry| entry.name == product) {
                continue;
            }

            ctx.rate_limiter.wait().await;
            let message = format!("{} can deliver {product}", ctx.agent.name);
            match ctx.client.apply(task.task_id, &message).await {
                Ok(outcome) => {
                    let mut machine = EscrowMachine::new(
                        EscrowRecord::new(task.task_id, task.publisher_address)
                            .with_product(product)
                            .with_deadline(task.deadline),
                    );
                    // The record starts at `Unknown`; this agent only
                    // observes the task after it was already published, so
                    // catch it up to `Published` before applying the event
                    // the marketplace actually returned.
                    let event = match outcome {
                        ApplyOutcome::Applied { application_id } => EscrowEvent::Applied { application_id },
                        ApplyOutcome::AlreadyApplied => EscrowEvent::AlreadyApplied,
                    };
                    if machine.apply_event(EscrowEvent::TaskCreated).is_ok()
                        && machine.apply_event(event).is_ok()
                    {
                        ctx.store.save_escrow(machine.record()).await?;
                        info!("{} applied to task {}", ctx.agent.name, task.task_id);
                    }
                }
                Err(e) => warn!("apply failed for task {}: {e}", task.task_id),
            }
        }
        Ok(())
    }

    /// Refreshes local records against the marketplace, then submits
    /// evidence for anything assigned to this agent.
    async fn submit(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let records = super::refresh_records(ctx).await?;
        super::submit_pending(ctx, &records).await
    }
}
