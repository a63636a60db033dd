//! Per-role tick behavior (spec.md §4.8): one `impl RolePlan` per
//! `karma_common::Role` variant, dispatched through an exhaustive `match` in
//! [`run_tick`] rather than a `dyn RolePlan` — the set of roles is closed
//! and known at compile time (the same reasoning the teacher applies to its
//! own closed enums dispatched via `match`).

mod buyer;
mod buyer_seller;
mod community_buyer;
mod coordinator;
mod evidence;
mod seller;
mod validator;

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use karma_common::{EvidenceKind, Role, TaskState};
use karma_escrow::{EscrowEvent, EscrowMachine, EscrowRecord};
use karma_marketplace::{BrowseFilter, CreateTaskFields, MarketplaceError};
use karma_store::LedgerEntry;
use log::{info, warn};
use uuid::Uuid;

use crate::runtime::RuntimeContext;

/// Prefix a consumer role uses to mark its own buy requests on the
/// marketplace, so sellers can distinguish "buy this for me" tasks from
/// other categories sharing the same board (spec.md §4.8's seller bullet).
pub const KK_REQUEST_PREFIX: &str = "[KK Request] ";

pub fn kk_request_title(product: &str) -> String {
    format!("{KK_REQUEST_PREFIX}{product}")
}

pub fn product_from_title(title: &str) -> Option<&str> {
    title.strip_prefix(KK_REQUEST_PREFIX)
}

/// The tagged behavior interface spec.md §9's Design Notes mandate for the
/// source's dynamic per-role dispatch: `browse`, `create`, `apply`,
/// `assign`, `submit`, `approve`, plus a `heartbeat` default that composes
/// them in the order a single tick performs them.
#[async_trait]
pub trait RolePlan {
    async fn browse(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn create(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn apply(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn assign(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn submit(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn approve(&self, ctx: &mut RuntimeContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Default composition; a role overrides only the steps it performs,
    /// matching spec.md §4.8's "scheduler fires -> role handler consults
    /// local store -> queries marketplace and chat -> drives the escrow
    /// state machine" sequence.
    async fn heartbeat(&self, ctx: &mut RuntimeContext) -> Result<String> {
        self.browse(ctx).await?;
        self.create(ctx).await?;
        self.apply(ctx).await?;
        self.assign(ctx).await?;
        self.submit(ctx).await?;
        self.approve(ctx).await?;
        Ok(format!("{} tick complete", ctx.role().as_str()))
    }
}

/// How long a published buy task stays open before `sweep_deadlines` (run at
/// the start of every tick, independent of role) closes it locally via
/// `EscrowEvent::DeadlineExceeded`.
const BUY_TASK_DEADLINE: Duration = Duration::hours(24);

/// Publishes a `[KK Request]` task for `product` if this agent has no
/// in-flight (non-terminal) escrow record for it already, per spec.md
/// §4.9's "never re-buys a product it already owns for the same cycle".
/// Returns the new task id, or `None` if a record for the product is
/// already in flight.
pub(crate) async fn publish_buy_task(
    ctx: &mut RuntimeContext,
    product: &str,
    bounty_decimal: f64,
    evidence_required: BTreeSet<EvidenceKind>,
) -> Result<Option<Uuid>> {
    let existing = ctx.store.list_escrow_records().await?;
    if existing
        .iter()
        .any(|r| r.product.as_deref() == Some(product) && !r.state.is_terminal())
    {
        return Ok(None);
    }

    let bounty = karma_signer::to_smallest_unit(bounty_decimal, ctx.token.decimals)?;
    let fields = CreateTaskFields {
        title: kk_request_title(product),
        description: format!("buy request for {product}, published by {}", ctx.agent.name),
        category: ctx.config.category.clone(),
        bounty,
        evidence_required,
        deadline: Utc::now() + BUY_TASK_DEADLINE,
    };

    ctx.rate_limiter.wait().await;
    let task_id = match ctx.client.create_task(&fields).await {
        Ok(task_id) => {
            ctx.clear_schema_invalid(product);
            task_id
        }
        Err(MarketplaceError::SchemaInvalid { body }) => {
            warn!("buy task for {product} rejected (422): {body}");
            ctx.record_schema_invalid(product)?;
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let mut machine = EscrowMachine::new(
        EscrowRecord::new(task_id, ctx.address())
            .with_product(product)
            .with_deadline(fields.deadline),
    );
    machine.apply_event(EscrowEvent::TaskCreated)?;
    ctx.store.save_escrow(machine.record()).await?;
    info!("{} published buy task {task_id} for {product}", ctx.agent.name);

    if let Some(chat) = ctx.chat.as_ref() {
        let announcement = karma_chat::MarketplaceAnnouncement::Need {
            product: product.to_string(),
            budget_usdc: format!("{bounty_decimal:.2}"),
            contact_hint: format!("dm @{}", ctx.agent.name),
        };
        if let Err(e) = chat.send(karma_chat::PROTOCOL_CHANNEL, &announcement.format()).await {
            warn!("chat NEED announcement dropped: {e}");
        }
    }

    Ok(Some(task_id))
}

/// Re-fetches authoritative marketplace state for every non-terminal local
/// escrow record (spec.md §4.4's "remote wins" reconciliation), then
/// returns the refreshed set.
pub(crate) async fn refresh_records(ctx: &mut RuntimeContext) -> Result<Vec<EscrowRecord>> {
    ctx.rate_limiter.wait().await;
    let reconciled = ctx.store.reconcile(&ctx.client).await?;
    if reconciled > 0 {
        info!("{} reconciled {reconciled} task(s) against the marketplace", ctx.agent.name);
    }
    Ok(ctx.store.list_escrow_records().await?)
}

/// As publisher: assigns the applicant the marketplace has surfaced for
/// every locally-tracked task still `APPLIED`. The marketplace exposes one
/// `application_id` per task rather than an enumerable candidate list, so
/// `karma_escrow::select_applicant`'s reputation-first tie-break is
/// exercised at the unit level against synthetic multi-candidate input
/// rather than here; see DESIGN.md.
pub(crate) async fn assign_pending(ctx: &mut RuntimeContext, records: &[EscrowRecord]) -> Result<()> {
    let own = records
        .iter()
        .filter(|r| r.publisher_address == ctx.address() && r.state == TaskState::Applied)
        .cloned()
        .collect::<Vec<_>>();
    for record in own {
        let Some(application_id) = record.application_id.clone() else {
            continue;
        };
        ctx.rate_limiter.wait().await;
        match ctx.client.assign(record.task_id, &application_id).await {
            Ok(assignee) => {
                let mut machine = EscrowMachine::new(record);
                if machine.apply_event(EscrowEvent::Assigned { assignee }).is_ok() {
                    ctx.store.save_escrow(machine.record()).await?;
                }
            }
            Err(e) => warn!("assign failed for {}: {e}", application_id),
        }
    }
    Ok(())
}

/// As executor: for every locally-tracked task `ASSIGNED` to this agent,
/// synthesizes evidence for the task's required kinds and submits it.
pub(crate) async fn submit_pending(ctx: &mut RuntimeContext, records: &[EscrowRecord]) -> Result<()> {
    let mine: Vec<_> = records
        .iter()
        .filter(|r| r.assignee_address == Some(ctx.address()) && r.state == TaskState::Assigned)
        .cloned()
        .collect();
    if mine.is_empty() {
        return Ok(());
    }

    ctx.rate_limiter.wait().await;
    let tasks = ctx.client.browse(&BrowseFilter::default()).await?;

    for record in mine {
        let Some(task) = tasks.iter().find(|t| t.task_id == record.task_id) else {
            continue;
        };
        let product = record.product.clone().unwrap_or_else(|| task.title.clone());
        let evidence = crate::roles::evidence::synthesize(&task.evidence_required, &product);

        ctx.rate_limiter.wait().await;
        match ctx.client.submit(record.task_id, &ctx.agent.name, &evidence).await {
            Ok(submission_id) => {
                let mut machine = EscrowMachine::new(record);
                if machine.apply_event(EscrowEvent::Submitted { submission_id }).is_ok() {
                    ctx.store.save_escrow(machine.record()).await?;
                }
            }
            // A 422 here moves the record straight to its terminal FAILED
            // sub-state (spec.md §7), so the task is never retried and
            // cannot loop the way a freshly re-created buy task can; see
            // `publish_buy_task`'s streak counter for the case that does.
            Err(MarketplaceError::SchemaInvalid { body }) => {
                warn!("submission for task {} rejected (422): {body}", task.task_id);
                let mut machine = EscrowMachine::new(record);
                if machine.apply_event(EscrowEvent::SchemaInvalid { body }).is_ok() {
                    ctx.store.save_escrow(machine.record()).await?;
                }
            }
            Err(e) => warn!("submit failed for task {}: {e}", task.task_id),
        }
    }
    Ok(())
}

/// As publisher: for every locally-tracked task `SUBMITTED`, fetches the
/// submitted evidence, runs spec.md §4.4's pre-approve check, and either
/// approves (then signs and ledgers the payment authorization) or rejects.
pub(crate) async fn approve_pending(ctx: &mut RuntimeContext, records: &[EscrowRecord]) -> Result<()> {
    let own: Vec<_> = records
        .iter()
        .filter(|r| r.publisher_address == ctx.address() && r.state == TaskState::Submitted)
        .cloned()
        .collect();
    if own.is_empty() {
        return Ok(());
    }

    ctx.rate_limiter.wait().await;
    let tasks = ctx.client.browse(&BrowseFilter::default()).await?;

    for record in own {
        let Some(submission_id) = record.submission_id.clone() else {
            continue;
        };
        let Some(task) = tasks.iter().find(|t| t.task_id == record.task_id) else {
            continue;
        };
        let Some(assignee) = record.assignee_address else {
            continue;
        };

        ctx.rate_limiter.wait().await;
        let evidence = match ctx.client.get_submission(record.task_id, &submission_id).await {
            Ok(evidence) => evidence,
            Err(e) => {
                warn!("could not fetch submission for task {}: {e}", task.task_id);
                continue;
            }
        };

        let satisfied = karma_escrow::evidence_satisfies_requirement(&task.evidence_required, &evidence);
        let mut machine = EscrowMachine::new(record);

        if !satisfied {
            if machine.apply_event(EscrowEvent::Rejected).is_ok() {
                ctx.store.save_escrow(machine.record()).await?;
                warn!("rejected task {} for missing evidence", task.task_id);
            }
            continue;
        }

        let ledger_entries = ctx.store.read_ledger().await?;
        let bounty_decimal = task.bounty as f64 / 10f64.powi(ctx.token.decimals as i32);
        if !ctx.budget.can_afford(&ledger_entries, task.bounty) {
            warn!("daily budget exhausted, deferring approval of task {}", task.task_id);
            continue;
        }

        ctx.rate_limiter.wait().await;
        if let Err(e) = ctx.client.approve(record.task_id, &submission_id).await {
            warn!("approve failed for task {}: {e}", task.task_id);
            continue;
        }
        if machine.apply_event(EscrowEvent::Approved).is_err() {
            continue;
        }

        match karma_signer::sign_authorization(&ctx.signing_key, &ctx.token, assignee, bounty_decimal) {
            Ok(authorization) => {
                ctx.store
                    .append_ledger(&LedgerEntry {
                        issued_at: Utc::now(),
                        authorization,
                    })
                    .await?;
                let _ = machine.apply_event(EscrowEvent::Settled);
                ctx.store.save_escrow(machine.record()).await?;
                info!("{} settled task {} with {assignee}", ctx.agent.name, task.task_id);
            }
            Err(e) => warn!("failed to sign payment authorization for task {}: {e}", task.task_id),
        }
    }
    Ok(())
}

/// One tick's entry point. Matches on `ctx.role()` rather than storing a
/// `Box<dyn RolePlan>`, per SPEC_FULL.md §4.8.1.
pub async fn run_tick(ctx: &mut RuntimeContext) -> Result<String> {
    sweep_deadlines(ctx).await?;
    match ctx.role() {
        Role::Seller => seller::SellerPlan.heartbeat(ctx).await,
        Role::Buyer => buyer::BuyerPlan.heartbeat(ctx).await,
        Role::BuyerSeller => buyer_seller::BuyerSellerPlan.heartbeat(ctx).await,
        Role::Validator => validator::ValidatorPlan.heartbeat(ctx).await,
        Role::Coordinator => coordinator::CoordinatorPlan.heartbeat(ctx).await,
        Role::CommunityBuyer => community_buyer::CommunityBuyerPlan.heartbeat(ctx).await,
    }
}

/// Closes any non-terminal record whose deadline has passed (spec.md §4.4:
/// "deadline exceeded -> EXPIRED -> state-machine closes the task locally"),
/// independent of role — a buyer's own buy task and a seller's assignment
/// both need this applied the same way.
async fn sweep_deadlines(ctx: &mut RuntimeContext) -> Result<()> {
    let now = Utc::now();
    let records = ctx.store.list_escrow_records().await?;
    for record in records {
        if record.state.is_terminal() {
            continue;
        }
        let Some(deadline) = record.deadline else {
            continue;
        };
        if now < deadline {
            continue;
        }
        let task_id = record.task_id;
        let mut machine = EscrowMachine::new(record);
        if machine.apply_event(EscrowEvent::DeadlineExceeded).is_ok() {
            ctx.store.save_escrow(machine.record()).await?;
            info!("{} closed task {task_id} locally: deadline exceeded", ctx.agent.name);
        }
    }
    Ok(())
}
